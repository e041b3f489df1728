use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use veil_core::core_identity::KeystoreDocument;
use veil_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use veil_core::types::ContactId;
use veil_core::{
    ContextError, InboundEnvelope, KeystoreCodec, OutboundEnvelope, Passphrase, VeilConfig,
    VeilContext,
};

/// Bits credited per simulated entropy sample
const SIMULATED_SAMPLE_BITS: u32 = 8;

/// Contact id the peer keystore is registered under
const PEER_ID: &str = "peer";

#[derive(Parser, Debug)]
#[command(name = "veil")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides the
    /// `[logging]` config section and VEIL_LOG_LEVEL
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; VEIL_* environment variables apply on top
    #[arg(long)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new identity and write a passphrase-protected keystore
    Generate {
        /// Directory for the keystore file
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        #[arg(long, env = "VEIL_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },

    /// Show the fingerprint recorded in a keystore, verifying it if a
    /// passphrase is given
    Inspect {
        keystore: PathBuf,

        #[arg(long, env = "VEIL_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
    },

    /// Encrypt a message for the owner of a peer keystore
    Encrypt {
        /// Our keystore
        #[arg(long)]
        keystore: PathBuf,

        /// The recipient's keystore; only its public keys are read
        #[arg(long)]
        peer: PathBuf,

        #[arg(long)]
        message: String,

        /// Burn the message this many seconds after it is displayed
        #[arg(long)]
        burn: Option<u64>,

        #[arg(long, env = "VEIL_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },

    /// Decrypt an envelope produced by `encrypt`
    Decrypt {
        /// Our keystore
        #[arg(long)]
        keystore: PathBuf,

        /// The sender's keystore; only its public keys are read
        #[arg(long)]
        peer: PathBuf,

        /// Envelope JSON file, or `-` for stdin
        #[arg(long, default_value = "-")]
        envelope: PathBuf,

        #[arg(long, env = "VEIL_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    init_logging_with_config(log_config(&args, &config)?)?;
    debug!(kdf = %config.session.kdf, "configuration loaded");

    match args.command {
        Command::Generate {
            out_dir,
            passphrase,
        } => generate(config, &out_dir, &secret(passphrase)).await,
        Command::Inspect {
            keystore,
            passphrase,
        } => inspect(config, &keystore, passphrase.map(secret)).await,
        Command::Encrypt {
            keystore,
            peer,
            message,
            burn,
            passphrase,
        } => encrypt(config, &keystore, &peer, &message, burn, &secret(passphrase)).await,
        Command::Decrypt {
            keystore,
            peer,
            envelope,
            passphrase,
        } => decrypt(config, &keystore, &peer, &envelope, &secret(passphrase)).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<VeilConfig> {
    let mut config = match path {
        Some(path) => VeilConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VeilConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Logging from the loaded config, with command-line flags on top
fn log_config(args: &Args, config: &VeilConfig) -> Result<LogConfig> {
    let mut log_config = LogConfig::try_from(&config.logging)?;

    if let Some(raw) = args.log_level.as_deref() {
        match LogLevel::from_str(raw) {
            Some(level) => log_config.level = level,
            None => eprintln!(
                "Invalid log level '{}', using '{}'",
                raw,
                log_config.level.as_str()
            ),
        }
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    Ok(log_config)
}

fn secret(passphrase: String) -> Passphrase {
    SecretString::new(passphrase)
}

async fn generate(config: VeilConfig, out_dir: &Path, passphrase: &Passphrase) -> Result<()> {
    let ctx = VeilContext::in_memory(config);

    // No pointer to follow on a terminal; samples are simulated
    ctx.begin_generation().await;
    let mut samples = 0u32;
    while !ctx.record_entropy(SIMULATED_SAMPLE_BITS).await.ready {
        samples += 1;
    }
    debug!(samples = samples + 1, "entropy collected");

    let identity = ctx.generate_identity(passphrase).await?;
    let exported = ctx.export_keystore(passphrase).await?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let path = out_dir.join(&exported.filename);
    std::fs::write(&path, &exported.bytes)
        .with_context(|| format!("writing {}", path.display()))?;

    info!(path = %path.display(), "keystore written");
    print_json(&json!({
        "file": path,
        "fingerprint": identity.fingerprint(),
    }))
}

async fn inspect(config: VeilConfig, keystore: &Path, passphrase: Option<Passphrase>) -> Result<()> {
    let bytes = read_file(keystore)?;
    let document: KeystoreDocument = serde_json::from_slice(&bytes)
        .map_err(|_| anyhow::anyhow!("{} is not a keystore", keystore.display()))?;

    let verified = match passphrase {
        Some(passphrase) => {
            let codec = KeystoreCodec::from_config(&config.keystore);
            let identity = tokio::task::spawn_blocking(move || codec.decode(&bytes, Some(&passphrase)))
                .await??;
            Some(identity.fingerprint() == &document.fingerprint)
        }
        None => None,
    };

    print_json(&json!({
        "version": document.version,
        "created": document.created,
        "protected": document.is_protected(),
        "fingerprint": document.fingerprint,
        "agreementKey": hex::encode(&document.key_pair.public_key),
        "verified": verified,
    }))
}

async fn encrypt(
    config: VeilConfig,
    keystore: &Path,
    peer: &Path,
    message: &str,
    burn: Option<u64>,
    passphrase: &Passphrase,
) -> Result<()> {
    let ctx = open_session(config, keystore, peer, passphrase).await?;
    let peer_id = ContactId::from(PEER_ID);

    let envelope = match burn {
        Some(seconds) => {
            ctx.send_burn_message(&peer_id, message, Some(Duration::from_secs(seconds)))
                .await?
        }
        None => ctx.send_message(&peer_id, message).await?,
    };
    print_json(&envelope)
}

async fn decrypt(
    config: VeilConfig,
    keystore: &Path,
    peer: &Path,
    envelope: &Path,
    passphrase: &Passphrase,
) -> Result<()> {
    let ctx = open_session(config, keystore, peer, passphrase).await?;

    let raw = if envelope == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        read_file(envelope)?
    };
    let outbound: OutboundEnvelope =
        serde_json::from_slice(&raw).context("envelope is not valid JSON")?;

    let inbound = InboundEnvelope {
        sender: ContactId::from(PEER_ID),
        payload: outbound.payload,
    };
    let id = match ctx.receive_message(inbound).await {
        Ok(id) => id,
        Err(e @ (ContextError::Cipher(_) | ContextError::MalformedPayload)) => {
            bail!("{}", e.user_message())
        }
        Err(e) => return Err(e.into()),
    };

    ctx.mark_displayed(id).await?;
    let summary = ctx.message(id).await?;
    let text = ctx.read_message(id).await?;

    print_json(&json!({
        "text": text.as_str(),
        "burnPolicy": summary.burn_policy,
    }))
}

/// Load our keystore and register the peer keystore's public key as a contact
async fn open_session(
    config: VeilConfig,
    keystore: &Path,
    peer: &Path,
    passphrase: &Passphrase,
) -> Result<VeilContext> {
    let ctx = VeilContext::in_memory(config);
    let ours = read_file(keystore)?;
    ctx.import_keystore(ours, passphrase)
        .await
        .with_context(|| format!("opening {}", keystore.display()))?;

    let peer_doc: KeystoreDocument = serde_json::from_slice(&read_file(peer)?)
        .map_err(|_| anyhow::anyhow!("{} is not a keystore", peer.display()))?;
    ctx.add_contact(
        ContactId::from(PEER_ID),
        PEER_ID,
        &peer_doc.key_pair.public_key,
        Some(&peer_doc.fingerprint),
    )
    .await
    .with_context(|| format!("reading peer {}", peer.display()))?;

    Ok(ctx)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
