//! Default browser profile locations

/// Chromium-family profile directories for the given OS, built from
/// environment variables. Directories that do not exist are harmless; the
/// browser checks skip them.
pub fn default_profile_roots<F>(os: &str, var: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let (base, browsers): (Option<String>, &[&str]) = match os {
        "windows" => (
            var("LOCALAPPDATA"),
            &[
                "Google/Chrome/User Data",
                "Microsoft/Edge/User Data",
                "BraveSoftware/Brave-Browser/User Data",
            ],
        ),
        "macos" => (
            var("HOME").map(|home| format!("{}/Library/Application Support", home)),
            &[
                "Google/Chrome",
                "Microsoft Edge",
                "BraveSoftware/Brave-Browser",
            ],
        ),
        _ => (
            var("XDG_CONFIG_HOME").or_else(|| var("HOME").map(|home| format!("{}/.config", home))),
            &[
                "google-chrome",
                "chromium",
                "microsoft-edge",
                "BraveSoftware/Brave-Browser",
            ],
        ),
    };

    let Some(base) = base else {
        return Vec::new();
    };
    browsers
        .iter()
        .map(|browser| format!("{}/{}/Default", base, browser))
        .collect()
}
