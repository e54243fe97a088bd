//! SteamCMD integration.
//!
//! Steam-backed blueprints resolve their latest version from the app's
//! public branch build id and install/update through `app_update`, which
//! collapses download and deploy into a single validated sync against the
//! install directory.

use std::path::Path;

use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::settings::Settings;

pub struct SteamCmd {
    exe: String,
    username: String,
    password: String,
}

impl SteamCmd {
    pub fn new(settings: &Settings) -> Self {
        Self {
            exe: settings.steamcmd_exe.clone(),
            username: settings.steam_username.clone(),
            password: settings.steam_password.clone(),
        }
    }

    fn login_args(&self, account_required: bool) -> Result<Vec<String>> {
        if !account_required {
            return Ok(vec!["+login".to_string(), "anonymous".to_string()]);
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(AppError::config(
                "blueprint requires a Steam account but steam_username/steam_password are unset",
            ));
        }
        Ok(vec![
            "+login".to_string(),
            self.username.clone(),
            self.password.clone(),
        ])
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let output = Command::new(&self.exe)
            .args(args)
            .output()
            .await
            .map_err(|e| AppError::steam(format!("failed to run {}: {}", self.exe, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                last_lines(&stdout, 3)
            } else {
                stderr.trim().to_string()
            };
            return Err(AppError::steam(format!(
                "steamcmd exited with {}: {}",
                output.status, detail
            )));
        }

        Ok(stdout)
    }

    /// Query the public branch build id for an app.
    pub async fn latest_build_id(&self, app_id: u32, account_required: bool) -> Result<String> {
        let mut args = self.login_args(account_required)?;
        args.extend([
            "+app_info_update".to_string(),
            "1".to_string(),
            "+app_info_print".to_string(),
            app_id.to_string(),
            "+quit".to_string(),
        ]);

        let stdout = self.run(&args).await?;
        parse_public_build_id(&stdout).ok_or_else(|| {
            AppError::parse(format!(
                "no public branch buildid in steamcmd output for app {}",
                app_id
            ))
        })
    }

    /// Install or update an app directly into `install_dir` with validation.
    pub async fn app_update(
        &self,
        app_id: u32,
        account_required: bool,
        install_dir: &Path,
    ) -> Result<()> {
        let mut args = vec![
            "+force_install_dir".to_string(),
            install_dir.display().to_string(),
        ];
        args.extend(self.login_args(account_required)?);
        args.extend([
            "+app_update".to_string(),
            app_id.to_string(),
            "validate".to_string(),
            "+quit".to_string(),
        ]);

        let stdout = self.run(&args).await?;

        // steamcmd is known to exit 0 on some failures; require the
        // explicit success marker.
        let success = format!("Success! App '{}'", app_id);
        if stdout.contains(&success) {
            Ok(())
        } else {
            Err(AppError::steam(format!(
                "app_update {} did not report success: {}",
                app_id,
                last_lines(&stdout, 3)
            )))
        }
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join(" | ")
}

/// Extract `branches → public → buildid` from `app_info_print` output.
///
/// The output is Valve KeyValues text; a full parser is overkill for one
/// field, so this walks the quoted tokens tracking section nesting.
fn parse_public_build_id(output: &str) -> Option<String> {
    let mut in_branches = false;
    let mut in_public = false;
    let mut depth_at_branches = 0usize;
    let mut depth = 0usize;

    for line in output.lines() {
        let trimmed = line.trim();
        match trimmed {
            "{" => depth += 1,
            "}" => {
                depth = depth.saturating_sub(1);
                if in_public && depth <= depth_at_branches + 1 {
                    in_public = false;
                }
                if in_branches && depth <= depth_at_branches {
                    in_branches = false;
                }
            }
            _ => {
                let key = trimmed.trim_matches('"');
                if key == "branches" {
                    in_branches = true;
                    depth_at_branches = depth;
                } else if in_branches && key == "public" {
                    in_public = true;
                } else if in_public && trimmed.starts_with("\"buildid\"") {
                    let value = trimmed
                        .trim_start_matches("\"buildid\"")
                        .trim()
                        .trim_matches('"');
                    return Some(value.to_string());
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::parse_public_build_id;

    const APP_INFO: &str = r#"
"258550"
{
    "common"
    {
        "name"      "Rust Dedicated Server"
    }
    "depots"
    {
        "branches"
        {
            "public"
            {
                "buildid"       "12345678"
                "timeupdated"   "1700000000"
            }
            "staging"
            {
                "buildid"       "99999999"
                "pwdrequired"   "1"
            }
        }
    }
}
"#;

    #[test]
    fn extracts_public_branch_build_id() {
        assert_eq!(parse_public_build_id(APP_INFO).as_deref(), Some("12345678"));
    }

    #[test]
    fn missing_branches_yields_none() {
        assert_eq!(parse_public_build_id("\"258550\"\n{\n}\n"), None);
    }

    #[test]
    fn does_not_pick_a_non_public_branch() {
        let only_staging = APP_INFO.replace("\"public\"", "\"beta\"");
        assert_eq!(parse_public_build_id(&only_staging), None);
    }
}
