//! Opening the SAML login page in the user's browser.

use std::process::{Command, Stdio};

use crate::error::{AppError, Result};

fn platform_browser() -> Result<Vec<&'static str>> {
    if cfg!(target_os = "macos") {
        Ok(vec!["open"])
    } else if cfg!(windows) {
        Ok(vec!["rundll32", "url.dll,FileProtocolHandler"])
    } else if cfg!(unix) {
        Ok(vec!["xdg-open"])
    } else {
        Err(AppError::Browser("Unsupported platform, pass --browser".into()))
    }
}

/// Builds the launcher command. `custom` is split on whitespace so that
/// values like `firefox --new-window` work.
pub fn browser_command(custom: Option<&str>, url: &str) -> Result<Command> {
    let parts: Vec<String> = match custom {
        Some(c) if !c.trim().is_empty() => c.split_whitespace().map(String::from).collect(),
        _ => platform_browser()?.into_iter().map(String::from).collect(),
    };
    let mut cmd = Command::new(&parts[0]);
    cmd.args(&parts[1..]).arg(url);
    Ok(cmd)
}

/// Fire and forget: the browser is not waited on.
pub fn open_url_in_browser(custom: Option<&str>, url: &str) -> Result<()> {
    let mut cmd = browser_command(custom, url)?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| AppError::Browser(format!("Cannot launch {:?}: {}", cmd.get_program(), e)))?;
    Ok(())
}
