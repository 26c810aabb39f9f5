//! weave-gateway server entry point.
//!
//! Serves a small demo application over the transport picked by `TRANSPORT`.

use serde_json::json;
use tracing_subscriber::EnvFilter;

use weave_gateway::app::App;
use weave_gateway::config::GatewayConfig;
use weave_gateway::session::Session;
use weave_gateway::ui::HtmlDocument;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = GatewayConfig::from_env()?;

    let ui = HtmlDocument::new(
        "<h1>Weave</h1>\n<input id=\"name\" type=\"text\">\n<p id=\"greeting\"></p>",
    )
    .with_title("Weave demo");

    let app = App::new(ui, greet, config);

    tokio::select! {
        result = app.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutdown requested");
        }
    }
    app.stop().await;

    Ok(())
}

fn greet(session: &mut Session) {
    session.set_output("greeting", json!("Hello from weave-gateway"));
    session.on_message("echo", |args| Ok(json!(args)));
}
