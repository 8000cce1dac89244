//! get_weather(city)：查询 wttr.in 风格的天气服务

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use crate::tools::{InputShape, Tool, ToolInput};

pub struct WeatherTool {
    client: reqwest::Client,
    base_url: String,
}

impl WeatherTool {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// {base}/{city}?format=%C+%t（天气状况 + 温度）
    fn url_for(&self, city: &str) -> Result<Url, String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| format!("Error: invalid weather service url: {}", e))?;
        url.path_segments_mut()
            .map_err(|_| "Error: invalid weather service url".to_string())?
            .pop_if_empty()
            .push(city);
        url.set_query(Some("format=%C+%t"));
        Ok(url)
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the current weather for a city. Input: \"city name\""
    }

    fn input_shape(&self) -> InputShape {
        InputShape::Text
    }

    async fn execute(&self, input: ToolInput) -> Result<String, String> {
        let city = input.text_or_field("city").unwrap_or_default().trim();
        if city.is_empty() {
            return Err("Error: city is required".to_string());
        }
        let url = self.url_for(city)?;
        tracing::info!(city = %city, "get_weather");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Something went wrong: {}", e))?;
        if !response.status().is_success() {
            return Err(format!("Something went wrong: HTTP {}", response.status()));
        }
        let text = response
            .text()
            .await
            .map_err(|e| format!("Something went wrong: {}", e))?;
        Ok(format!("The weather in {} is {}.", city, text.trim()))
    }
}
