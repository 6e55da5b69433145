//! `.ovpn` preparation: strip directives that break the SAML flow, pull out
//! the `remote` endpoint, and resolve the gateway to a concrete address.

use std::io::{BufRead, BufReader, Write as _};
use std::net::{IpAddr, ToSocketAddrs};
use std::path::Path;

use log::debug;

use crate::error::{AppError, Result};

/// OpenVPN's port when a `remote` line omits it.
const DEFAULT_OPENVPN_PORT: u16 = 1194;

const STRIPPED_PREFIXES: &[&[u8]] = &[b"auth-retry", b"resolv-retry", b"auth-federate"];

/// The sanitized copy lives as long as this value; dropping it removes the file.
pub struct SanitizedConfig {
    pub file: tempfile::NamedTempFile,
    pub server: String,
    pub port: u16,
}

impl SanitizedConfig {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

// ── Config transformer ────────────────────────────────────────────────────────

pub fn prepare_ovpn_config(ovpn_path: &Path) -> Result<SanitizedConfig> {
    let source = std::fs::File::open(ovpn_path)
        .map_err(|e| AppError::Config(format!("Cannot read {}: {}", ovpn_path.display(), e)))?;

    let mut tmp = tempfile::Builder::new()
        .prefix("aws_vpn_wrapper_config_")
        .suffix(".conf")
        .tempfile()?;

    // Lines are bytes: comments in legacy encodings pass through untouched.
    let mut remote: Option<(String, u16)> = None;
    {
        let mut reader = BufReader::new(source);
        let mut writer = std::io::BufWriter::new(tmp.as_file_mut());
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = trim_line_ending(&buf);
            if STRIPPED_PREFIXES.iter().any(|p| line.starts_with(p)) {
                debug!("Dropping directive: {}", String::from_utf8_lossy(line));
                continue;
            }
            if line.starts_with(b"remote ") {
                remote = Some(parse_remote_line(&String::from_utf8_lossy(line))?);
                continue;
            }
            writer.write_all(line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }

    // Last `remote` wins, matching the order OpenVPN itself would read them in.
    let (server, port) = remote.ok_or_else(|| {
        AppError::Config(format!("No `remote` directive in {}", ovpn_path.display()))
    })?;

    Ok(SanitizedConfig { file: tmp, server, port })
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_remote_line(line: &str) -> Result<(String, u16)> {
    let mut fields = line.split_whitespace().skip(1);
    let host = fields
        .next()
        .ok_or_else(|| AppError::Config(format!("`remote` without a host: {:?}", line)))?;
    let port = match fields.next() {
        Some(p) => p
            .parse()
            .map_err(|_| AppError::Config(format!("Bad port in `remote` line: {:?}", line)))?,
        None => DEFAULT_OPENVPN_PORT,
    };
    Ok((host.to_string(), port))
}

// ── Gateway resolution ────────────────────────────────────────────────────────

/// AWS Client VPN endpoints answer `dns.<endpoint>` with a concrete server,
/// which keeps the probe and the authenticated connection on the same node.
pub fn resolve_server(host: &str) -> Result<String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }
    let name = format!("dns.{}", host);
    let mut addrs = (name.as_str(), 0)
        .to_socket_addrs()
        .map_err(|e| AppError::Resolve(format!("{}: {}", name, e)))?;
    addrs
        .next()
        .map(|addr| addr.ip().to_string())
        .ok_or_else(|| AppError::Resolve(format!("No addresses returned for {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_ovpn(content: impl AsRef<[u8]>) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_ref()).unwrap();
        f.flush().unwrap();
        f
    }

    const SAMPLE: &str = "\
client
dev tun
proto udp
remote cvpn-endpoint-0123456789abcdef0.prod.clientvpn.eu-west-1.amazonaws.com 443
remote-random-hostname
resolv-retry infinite
nobind
auth-retry interact
auth-federate
reneg-sec 0
<ca>
-----BEGIN CERTIFICATE-----
MIIB
-----END CERTIFICATE-----
</ca>
";

    #[test]
    fn sanitize_keeps_other_lines_in_order() {
        let src = write_ovpn(SAMPLE);
        let cfg = prepare_ovpn_config(src.path()).unwrap();
        let out = std::fs::read_to_string(cfg.path()).unwrap();
        let expected = "\
client
dev tun
proto udp
remote-random-hostname
nobind
reneg-sec 0
<ca>
-----BEGIN CERTIFICATE-----
MIIB
-----END CERTIFICATE-----
</ca>
";
        assert_eq!(out, expected);
    }

    #[test]
    fn sanitize_extracts_remote_host_and_port() {
        let src = write_ovpn(SAMPLE);
        let cfg = prepare_ovpn_config(src.path()).unwrap();
        assert_eq!(cfg.server, "cvpn-endpoint-0123456789abcdef0.prod.clientvpn.eu-west-1.amazonaws.com");
        assert_eq!(cfg.port, 443);
        let out = std::fs::read_to_string(cfg.path()).unwrap();
        assert!(!out.lines().any(|l| l.starts_with("remote ")));
    }

    #[test]
    fn stripped_directives_go_regardless_of_arguments() {
        let src = write_ovpn(
            "remote vpn.example.com 1194\nauth-retry\nauth-retry nointeract\nresolv-retry 5\nauth-federate yes please\nverb 3\n",
        );
        let cfg = prepare_ovpn_config(src.path()).unwrap();
        let out = std::fs::read_to_string(cfg.path()).unwrap();
        assert_eq!(out, "verb 3\n");
    }

    #[test]
    fn crlf_input_is_normalised() {
        let src = write_ovpn("client\r\nremote vpn.example.com 443\r\ndev tun\r\n");
        let cfg = prepare_ovpn_config(src.path()).unwrap();
        assert_eq!(std::fs::read_to_string(cfg.path()).unwrap(), "client\ndev tun\n");
    }

    #[test]
    fn non_utf8_lines_are_copied_byte_for_byte() {
        let src = write_ovpn(
            b"client\n# Soci\xe9t\xe9 VPN\nremote vpn.example.com 443\nauth-retry \xff\nverb 3",
        );
        let cfg = prepare_ovpn_config(src.path()).unwrap();
        assert_eq!(cfg.server, "vpn.example.com");
        assert_eq!(
            std::fs::read(cfg.path()).unwrap(),
            b"client\n# Soci\xe9t\xe9 VPN\nverb 3\n"
        );
    }

    #[test]
    fn remote_without_port_uses_openvpn_default() {
        let src = write_ovpn("remote vpn.example.com\n");
        let cfg = prepare_ovpn_config(src.path()).unwrap();
        assert_eq!(cfg.port, 1194);
    }

    #[test]
    fn missing_remote_is_an_error() {
        let src = write_ovpn("client\ndev tun\n");
        assert!(matches!(prepare_ovpn_config(src.path()), Err(AppError::Config(_))));
    }

    #[test]
    fn bad_port_is_an_error() {
        let src = write_ovpn("remote vpn.example.com https\n");
        assert!(matches!(prepare_ovpn_config(src.path()), Err(AppError::Config(_))));
    }

    #[test]
    fn unreadable_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = prepare_ovpn_config(&dir.path().join("missing.ovpn"));
        assert!(matches!(res, Err(AppError::Config(_))));
    }

    #[test]
    fn sanitized_copy_is_removed_on_drop() {
        let src = write_ovpn(SAMPLE);
        let cfg = prepare_ovpn_config(src.path()).unwrap();
        let path = cfg.path().to_path_buf();
        assert!(path.exists());
        drop(cfg);
        assert!(!path.exists());
    }

    #[test]
    fn literal_ip_skips_dns() {
        assert_eq!(resolve_server("198.51.100.7").unwrap(), "198.51.100.7");
    }

    #[test]
    fn unresolvable_gateway_is_an_error() {
        assert!(matches!(resolve_server("example.invalid"), Err(AppError::Resolve(_))));
    }
}
