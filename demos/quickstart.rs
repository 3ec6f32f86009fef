use anyhow::Result;
use sandbox_pilot::{
    Agent, AgentConfig, Browser, BrowserConfig, RunEvent, Session, VisionClient, VisionConfig,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let objective = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let objective = if objective.trim().is_empty() {
        "Open example.com and click the 'More information' link.".to_string()
    } else {
        objective
    };

    let bcfg = BrowserConfig { headless: false, ..Default::default() };
    let browser = match std::env::var("CHROME_WS_URL") {
        Ok(ws) if !ws.trim().is_empty() => Browser::connect(&ws, bcfg).await?,
        _ => Browser::launch(bcfg).await?,
    };
    if let Ok(url) = std::env::var("START_URL") {
        browser.goto(&url).await?;
    }
    let computer = Arc::new(browser);

    let reasoner = VisionClient::new(VisionConfig::default())?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let agent = Agent::new(Arc::clone(&computer), reasoner, AgentConfig::from_env()).with_events(tx);
    let session = Session::new(computer, agent);

    tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            match &ev {
                RunEvent::Preview { step, path } => info!(step, path = %path.display(), "preview"),
                other => info!(event = %serde_json::to_string(other).unwrap_or_default(), "run event"),
            }
        }
    });

    let handle = session.start(&objective)?;
    tokio::select! {
        res = handle => {
            let report = res??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ = tokio::signal::ctrl_c() => {
            session.stop();
            info!("stop requested, exiting");
        }
    }
    Ok(())
}
