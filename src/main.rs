//! aws-saml-vpn: OpenVPN wrapper for AWS Client VPN with SAML federation
//!
//! Flow: sanitize .ovpn → probe openvpn for the SAML URL → browser login →
//! SAMLResponse callback on 127.0.0.1:35001 → authenticated openvpn →
//! re-authenticate whenever the tunnel drops.

mod browser;
mod callback;
mod error;
mod logger;
mod models;
mod openvpn;
mod ovpn;
mod process;
mod settings;
mod worker;

use clap::Parser;
use crossbeam_channel::bounded;
use log::{error, info};

use crate::callback::CallbackServer;
use crate::error::Result;
use crate::logger::LogLevel;
use crate::models::Session;
use crate::openvpn::{OpenVpn, SAML_LISTEN_PORT};
use crate::settings::Settings;
use crate::worker::{Worker, QUEUE_CAPACITY};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "aws-saml-vpn", about = "AWS Client VPN with SAML authentication over OpenVPN", version)]
struct Cli {
    /// Path to the OpenVPN config file (default: ./config.ovpn)
    #[arg(long, env = "AWS_SAML_VPN_CONFIG")]
    config: Option<String>,
    /// Path to the AWS-patched OpenVPN binary (default: openvpn)
    #[arg(long, env = "AWS_SAML_VPN_OPENVPN")]
    openvpn: Option<String>,
    /// Privilege escalation command for the tunnel (default: sudo)
    #[arg(long, conflicts_with = "no_elevate")]
    elevate: Option<String>,
    /// Run the tunnel without a privilege escalation wrapper
    #[arg(long)]
    no_elevate: bool,
    /// Command used to open the SAML login page (default: platform opener)
    #[arg(long)]
    browser: Option<String>,
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,
    /// Remember --config, --openvpn, --elevate and --browser for next time
    #[arg(long)]
    save: bool,
}

impl Cli {
    /// Flags win over stored settings.
    fn merge(&self, stored: Settings) -> Settings {
        Settings {
            config: self.config.clone().or(stored.config),
            openvpn: self.openvpn.clone().or(stored.openvpn),
            elevate: self.elevate.clone().or(stored.elevate),
            browser: self.browser.clone().or(stored.browser),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    logger::init_logger(cli.log_level.into());
    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings_path = settings::settings_path();
    let effective = cli.merge(settings::load_settings(&settings_path)?);
    if cli.save {
        settings::save_settings(&settings_path, &effective)?;
        info!("Saved settings to {}", settings_path.display());
    }

    let ovpn_path = settings::expand_home(
        effective.config.as_deref().unwrap_or(settings::DEFAULT_OVPN_PATH),
    );
    info!("Loading config from {}", ovpn_path.display());
    let sanitized = ovpn::prepare_ovpn_config(&ovpn_path)?;

    let server = ovpn::resolve_server(&sanitized.server)?;
    info!("Starting VPN connection to {}:{}", server, sanitized.port);

    let signals = process::operator_signals()?;
    let (assertion_tx, assertion_rx) = bounded(QUEUE_CAPACITY);
    let callback = CallbackServer::bind(&format!("127.0.0.1:{}", SAML_LISTEN_PORT), assertion_tx)?
        .spawn()?;

    let openvpn_bin = effective
        .openvpn
        .unwrap_or_else(|| settings::DEFAULT_OPENVPN_BINARY.to_string());
    let session = Session::new(server, sanitized.port, sanitized.path().to_path_buf(), openvpn_bin);

    let elevate = if cli.no_elevate {
        None
    } else {
        openvpn::effective_elevation(Some(
            effective.elevate.unwrap_or_else(|| settings::DEFAULT_ELEVATE.to_string()),
        ))
    };

    let mut worker = Worker::new(
        OpenVpn::new(elevate, effective.browser),
        session,
        assertion_rx,
        signals,
    );
    let result = worker.run();

    callback.shutdown();
    drop(sanitized);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_stored_settings() {
        let cli = Cli::parse_from(["aws-saml-vpn", "--openvpn", "/opt/acvc-openvpn"]);
        let stored = Settings {
            config: Some("~/aws.ovpn".into()),
            openvpn: Some("openvpn".into()),
            elevate: Some("doas".into()),
            browser: None,
        };
        let merged = cli.merge(stored);
        assert_eq!(merged.config.as_deref(), Some("~/aws.ovpn"));
        assert_eq!(merged.openvpn.as_deref(), Some("/opt/acvc-openvpn"));
        assert_eq!(merged.elevate.as_deref(), Some("doas"));
        assert_eq!(merged.browser, None);
    }

    #[test]
    fn elevate_conflicts_with_no_elevate() {
        let res = Cli::try_parse_from(["aws-saml-vpn", "--elevate", "doas", "--no-elevate"]);
        assert!(res.is_err());
    }

    #[test]
    fn log_level_defaults_to_info() {
        let cli = Cli::try_parse_from(["aws-saml-vpn"]).unwrap();
        assert_eq!(cli.log_level, LogLevel::Info);
        assert!(!cli.save);
    }
}
