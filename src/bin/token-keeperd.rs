//! Token keeper daemon: keeps every stored EVE character token fresh until interrupted.

// std
use std::{path::PathBuf, sync::Arc};
// crates.io
use clap::{Args, Parser, Subcommand};
use color_eyre::{Result, eyre::eyre};
use time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;
// self
use token_keeper::{
	config::{DEFAULT_TOKEN_URL, KeeperConfig, RefreshPolicy},
	credential::SubjectId,
	manager::{IssuedTokens, TokenManager},
	store::FileStore,
	sweep::SweepScheduler,
};

#[derive(Debug, Parser)]
#[command(version, about = "Keeps OAuth 2.0 tokens for EVE characters fresh.")]
struct Cli {
	#[command(flatten)]
	keeper: KeeperArgs,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Args)]
struct KeeperArgs {
	/// OAuth 2.0 client identifier.
	#[arg(long, env = "CLIENT_ID")]
	client_id: String,
	/// OAuth 2.0 client secret.
	#[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
	client_secret: String,
	/// Token endpoint used for refresh exchanges.
	#[arg(long, env = "TOKEN_URL", default_value = DEFAULT_TOKEN_URL)]
	token_url: Url,
	/// Snapshot file holding the credential records.
	#[arg(long, env = "TOKEN_STORE_PATH", default_value = "tokens.json")]
	store_path: PathBuf,
	/// Seconds between proactive sweeps.
	#[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 1_080)]
	sweep_interval_secs: i64,
	/// Subjects refreshed concurrently during a sweep.
	#[arg(long, env = "SWEEP_CONCURRENCY", default_value_t = KeeperConfig::DEFAULT_SWEEP_CONCURRENCY)]
	sweep_concurrency: usize,
	/// Seconds before expiry at which a token is treated as stale.
	#[arg(long, env = "STALENESS_MARGIN_SECS", default_value_t = 120)]
	staleness_margin_secs: i64,
	/// Prefix of the store keys owned by this keeper.
	#[arg(long, env = "KEY_PREFIX", default_value = "eve-token-")]
	key_prefix: String,
}
impl KeeperArgs {
	fn config(&self) -> KeeperConfig {
		KeeperConfig::new(&self.client_id, &self.client_secret)
			.with_token_url(self.token_url.clone())
			.with_policy(
				RefreshPolicy::default()
					.with_staleness_margin(Duration::seconds(self.staleness_margin_secs)),
			)
			.with_sweep_interval(Duration::seconds(self.sweep_interval_secs))
			.with_sweep_concurrency(self.sweep_concurrency)
			.with_key_prefix(&self.key_prefix)
	}
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Run the sweep scheduler until Ctrl-C (default).
	Run,
	/// Store the tokens returned by an authorization-code exchange.
	Ingest {
		/// Character id the tokens belong to.
		#[arg(long)]
		subject: SubjectId,
		/// Access token.
		#[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
		access_token: String,
		/// Refresh token.
		#[arg(long, env = "REFRESH_TOKEN", hide_env_values = true)]
		refresh_token: String,
		/// Declared validity in seconds.
		#[arg(long, default_value_t = 1_200)]
		expires_in: i64,
	},
	/// Print a valid access token for a subject, refreshing it first when stale.
	Token {
		/// Character id to look up.
		subject: SubjectId,
	},
	/// List every subject in the store.
	List,
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let cli = Cli::parse();
	let config = cli.keeper.config();
	let store = FileStore::open(&cli.keeper.store_path)?;
	let manager = Arc::new(TokenManager::from_config(&config, Arc::new(store))?);

	match cli.command.unwrap_or(Command::Run) {
		Command::Run => run(manager, &config).await?,
		Command::Ingest { subject, access_token, refresh_token, expires_in } => {
			let record = manager
				.ingest(IssuedTokens::new(subject, access_token, refresh_token, expires_in))
				.await?;

			println!("{} expires at {}", record.subject, record.expires_at());
		},
		Command::Token { subject } => {
			let token = manager.get_valid_token(&subject).await?;

			println!("{}", token.expose());
		},
		Command::List =>
			for subject in manager.subjects().await? {
				println!("{subject}");
			},
	}

	Ok(())
}

async fn run(manager: Arc<TokenManager>, config: &KeeperConfig) -> Result<()> {
	let shutdown = CancellationToken::new();
	let handle = SweepScheduler::new(manager, config.sweep_interval)
		.with_concurrency(config.sweep_concurrency)
		.spawn(shutdown.clone());

	tracing::info!(
		interval_secs = config.sweep_interval.whole_seconds(),
		concurrency = config.sweep_concurrency,
		"token keeper started"
	);
	tokio::signal::ctrl_c().await?;
	tracing::info!("shutdown requested; waiting for the current sweep");
	handle.shutdown().await.map_err(|e| eyre!("sweep task failed: {e}"))?;

	Ok(())
}
