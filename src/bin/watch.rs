use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use watch_signal::logger::init_logging;
use watch_signal::peer::{analyze_candidates, candidates_in_sdp, ServerConfig};
use watch_signal::{
    DescriptionSource, Negotiator, PeerOfferSource, SessionDescription, SignalConfig,
    SignalingClient,
};

/// Negotiate a receive-only video session with a signaling server
///
/// Settings come from `WATCH_SIGNAL_*` environment variables; flags override them.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signaling server base URL
    #[arg(short, long)]
    url: Option<String>,

    /// Seconds to wait for candidate gathering to finish
    #[arg(short, long)]
    gather_timeout: Option<u64>,

    /// Seconds allowed for the signaling request
    #[arg(short, long)]
    request_timeout: Option<u64>,

    /// STUN server, repeatable; replaces the configured servers
    #[arg(long)]
    stun: Vec<String>,
}

impl Args {
    fn config(&self) -> watch_signal::Result<SignalConfig> {
        Ok(self.override_config(SignalConfig::from_env()?))
    }

    fn override_config(&self, mut config: SignalConfig) -> SignalConfig {
        if let Some(url) = &self.url {
            config.base_url = url.clone();
        }
        if let Some(secs) = self.gather_timeout {
            config.gather_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.request_timeout {
            config.request_timeout = Duration::from_secs(secs);
        }
        if !self.stun.is_empty() {
            config.ice_servers = self
                .stun
                .iter()
                .enumerate()
                .map(|(i, url)| ServerConfig {
                    id: format!("cli-stun-{i}"),
                    r#type: "stun".into(),
                    url: url.clone(),
                    username: None,
                    credential: None,
                })
                .collect();
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(true);
    let args = Args::parse();

    let result = match args.config() {
        Ok(config) => run(config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("negotiation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: SignalConfig) -> watch_signal::Result<()> {
    config.validate()?;

    let client = SignalingClient::from_config(&config)?;
    let source = PeerOfferSource::watch(&config).await?;
    let negotiator = Negotiator::from_config(source, client, &config);

    info!("negotiating with {}", config.base_url);
    let answer = match negotiator.begin().await {
        Ok(answer) => answer,
        Err(e) => {
            let _ = negotiator.source().close().await;
            return Err(e);
        }
    };

    if let Some(local) = negotiator.source().local_description().await {
        analyze_candidates(&candidates_in_sdp(local.sdp()));
    }

    accept_answer(negotiator.source(), answer).await?;
    info!("session established, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C, shutting down: {e}");
    }
    negotiator.source().close().await
}

/// Applies `answer`, closing the peer when it is rejected.
async fn accept_answer(
    source: &PeerOfferSource,
    answer: SessionDescription,
) -> watch_signal::Result<()> {
    if let Err(e) = source.apply_answer(answer).await {
        if let Err(close_err) = source.close().await {
            warn!("failed to close peer after rejected answer: {close_err}");
        }
        return Err(e);
    }
    Ok(())
}
