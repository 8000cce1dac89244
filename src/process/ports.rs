//! 启动命令分类与端口推测
//!
//! 推测出的 URL 只是提示：dev server 可能因端口占用换端口，
//! 因此启动成功后再做一次尽力而为的 TCP 探测，结果单独标注。

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::net::TcpStream;

/// 按启动命令区分的服务类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerKind {
    /// vite / `npm run dev` 一类的打包器 dev server
    DevBundler,
    /// `npm start` / `yarn start`（CRA 等）
    NodeStart,
    Cargo,
    Other,
}

const BUNDLER_PATTERNS: &[&str] = &[
    "npm run dev",
    "yarn dev",
    "yarn run dev",
    "pnpm dev",
    "pnpm run dev",
    "bun run dev",
    "vite",
];

const NODE_START_PATTERNS: &[&str] = &["npm start", "npm run start", "yarn start", "pnpm start"];

impl ServerKind {
    pub fn classify(command: &str) -> Self {
        let lower = command.to_lowercase();
        if BUNDLER_PATTERNS.iter().any(|p| lower.contains(p)) {
            ServerKind::DevBundler
        } else if NODE_START_PATTERNS.iter().any(|p| lower.contains(p)) {
            ServerKind::NodeStart
        } else if first_token(&lower) == Some("cargo") {
            ServerKind::Cargo
        } else {
            ServerKind::Other
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            ServerKind::DevBundler => Some(5173),
            ServerKind::NodeStart => Some(3000),
            ServerKind::Cargo | ServerKind::Other => None,
        }
    }

    /// 打包器首次编译较慢，启动后等待更久
    pub fn is_bundler(&self) -> bool {
        matches!(self, ServerKind::DevBundler)
    }
}

fn first_token(command: &str) -> Option<&str> {
    command.split_whitespace().next()
}

/// 命令要求工作目录中存在的标记文件（npm 系需要 package.json，cargo 需要 Cargo.toml）
pub fn required_marker(command: &str) -> Option<&'static str> {
    match first_token(command)? {
        "npm" | "yarn" | "pnpm" | "npx" | "bun" => Some("package.json"),
        "cargo" => Some("Cargo.toml"),
        _ => None,
    }
}

/// 命令中显式给出的 `--port N` / `--port=N`
pub fn explicit_port(command: &str) -> Option<u16> {
    let mut tokens = command.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "--port" {
            return tokens.next().and_then(|p| p.parse().ok());
        }
        if let Some(p) = token.strip_prefix("--port=") {
            return p.parse().ok();
        }
    }
    None
}

/// 推测服务端口：显式端口优先；否则取该类型默认端口，并跳过同类其他运行中服务已分配的端口
///
/// `claimed` 是同类型、已在运行的其他服务记录下来的端口（不含本服务）。
pub fn guess_port(command: &str, claimed: impl IntoIterator<Item = u16>) -> Option<u16> {
    if let Some(port) = explicit_port(command) {
        return Some(port);
    }
    let default = ServerKind::classify(command).default_port()?;
    let used: BTreeSet<u16> = claimed.into_iter().collect();
    let mut port = default;
    while used.contains(&port) {
        port = port.checked_add(1)?;
    }
    Some(port)
}

/// 尝试连接 localhost:port，能连上则认为 URL 已确认
pub async fn probe(port: u16, wait: Duration) -> bool {
    matches!(
        tokio::time::timeout(wait, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}
