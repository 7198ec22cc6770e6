//! Server command implementation

use anyhow::Result;

use till_core::CoreConfig;
use till_gateway::GatewayConfig;

use super::open_db;

pub async fn cmd_serve(
    config: CoreConfig,
    host: &str,
    port: u16,
    token: Option<String>,
) -> Result<()> {
    println!("🚀 Starting Till gateway...");
    println!("   Database:  {}", config.db_path().display());
    println!("   Backend:   {}", config.backend_url);
    println!("   Listening: http://{}:{}", host, port);

    if token.is_none() {
        println!("   ⚠️  No gateway token set - bind to loopback only");
    }

    let db = open_db(&config)?;

    let gateway = GatewayConfig { auth_token: token };
    till_gateway::serve(db, config, gateway, host, port).await
}
