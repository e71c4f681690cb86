/// Best-effort `User-Agent` parsing for the session list
///
/// Recognizes the common browsers, operating systems and form factors well
/// enough to label a session ("Chrome on macOS, desktop"). Anything
/// unrecognized is reported as `None` / [`DeviceType::Unknown`].

use serde::{Deserialize, Serialize};

/// Form factor of the client device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Bot,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Bot => "bot",
            DeviceType::Unknown => "unknown",
        }
    }
}

/// Parsed client description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub device_type: DeviceType,
    pub browser: Option<String>,
    pub os: Option<String>,
}

impl ClientInfo {
    fn unknown() -> Self {
        Self {
            device_type: DeviceType::Unknown,
            browser: None,
            os: None,
        }
    }
}

const BOT_MARKERS: &[&str] = &["bot", "crawler", "spider", "slurp", "curl/", "wget/", "python-requests", "headless"];

/// Parses a raw `User-Agent` header value
pub fn parse(user_agent: &str) -> ClientInfo {
    let ua = user_agent.trim();
    if ua.is_empty() {
        return ClientInfo::unknown();
    }

    let lower = ua.to_ascii_lowercase();
    let os = detect_os(&lower);
    let browser = detect_browser(ua, &lower);
    let device_type = detect_device(&lower, os.as_deref());

    ClientInfo {
        device_type,
        browser,
        os,
    }
}

fn detect_device(lower: &str, os: Option<&str>) -> DeviceType {
    if BOT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return DeviceType::Bot;
    }

    if lower.contains("ipad") || lower.contains("tablet") || (lower.contains("android") && !lower.contains("mobile")) {
        return DeviceType::Tablet;
    }

    if lower.contains("mobi") || lower.contains("iphone") || lower.contains("ipod") {
        return DeviceType::Mobile;
    }

    match os {
        Some("Windows") | Some("macOS") | Some("Linux") | Some("ChromeOS") => DeviceType::Desktop,
        _ => DeviceType::Unknown,
    }
}

fn detect_os(lower: &str) -> Option<String> {
    let os = if lower.contains("iphone") || lower.contains("ipad") || lower.contains("ipod") {
        "iOS"
    } else if lower.contains("android") {
        "Android"
    } else if lower.contains("cros") {
        "ChromeOS"
    } else if lower.contains("windows") {
        "Windows"
    } else if lower.contains("mac os x") || lower.contains("macintosh") {
        "macOS"
    } else if lower.contains("linux") || lower.contains("x11") {
        "Linux"
    } else {
        return None;
    };

    Some(os.to_string())
}

fn detect_browser(ua: &str, lower: &str) -> Option<String> {
    // order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari
    let candidates: &[(&str, &str)] = &[
        ("edg/", "Edge"),
        ("edga/", "Edge"),
        ("edgios/", "Edge"),
        ("opr/", "Opera"),
        ("samsungbrowser/", "Samsung Internet"),
        ("firefox/", "Firefox"),
        ("fxios/", "Firefox"),
        ("crios/", "Chrome"),
        ("chrome/", "Chrome"),
        ("safari/", "Safari"),
    ];

    for (marker, name) in candidates {
        if let Some(idx) = lower.find(marker) {
            let version_start = idx + marker.len();
            let major: String = ua[version_start..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();

            // Safari's real version lives in the Version/ token
            let major = if *name == "Safari" {
                safari_version(ua, lower).unwrap_or(major)
            } else {
                major
            };

            return Some(if major.is_empty() {
                name.to_string()
            } else {
                format!("{} {}", name, major)
            });
        }
    }

    None
}

fn safari_version(ua: &str, lower: &str) -> Option<String> {
    let idx = lower.find("version/")? + "version/".len();
    let major: String = ua[idx..].chars().take_while(|c| c.is_ascii_digit()).collect();
    (!major.is_empty()).then_some(major)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_on_macos() {
        let info = parse("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36");
        assert_eq!(info.device_type, DeviceType::Desktop);
        assert_eq!(info.browser.as_deref(), Some("Chrome 120"));
        assert_eq!(info.os.as_deref(), Some("macOS"));
    }

    #[test]
    fn test_edge_on_windows() {
        let info = parse("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91");
        assert_eq!(info.device_type, DeviceType::Desktop);
        assert_eq!(info.browser.as_deref(), Some("Edge 120"));
        assert_eq!(info.os.as_deref(), Some("Windows"));
    }

    #[test]
    fn test_firefox_on_linux() {
        let info = parse("Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0");
        assert_eq!(info.device_type, DeviceType::Desktop);
        assert_eq!(info.browser.as_deref(), Some("Firefox 121"));
        assert_eq!(info.os.as_deref(), Some("Linux"));
    }

    #[test]
    fn test_safari_on_iphone() {
        let info = parse("Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1");
        assert_eq!(info.device_type, DeviceType::Mobile);
        assert_eq!(info.browser.as_deref(), Some("Safari 17"));
        assert_eq!(info.os.as_deref(), Some("iOS"));
    }

    #[test]
    fn test_android_phone_and_tablet() {
        let phone = parse("Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.144 Mobile Safari/537.36");
        assert_eq!(phone.device_type, DeviceType::Mobile);
        assert_eq!(phone.os.as_deref(), Some("Android"));

        let tablet = parse("Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36");
        assert_eq!(tablet.device_type, DeviceType::Tablet);
    }

    #[test]
    fn test_ipad() {
        let info = parse("Mozilla/5.0 (iPad; CPU OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1");
        assert_eq!(info.device_type, DeviceType::Tablet);
        assert_eq!(info.os.as_deref(), Some("iOS"));
    }

    #[test]
    fn test_bots_and_tools() {
        assert_eq!(parse("Googlebot/2.1 (+http://www.google.com/bot.html)").device_type, DeviceType::Bot);
        assert_eq!(parse("curl/8.4.0").device_type, DeviceType::Bot);
    }

    #[test]
    fn test_empty_and_garbage() {
        assert_eq!(parse(""), ClientInfo::unknown());
        let info = parse("SomethingElse/1.0");
        assert_eq!(info.device_type, DeviceType::Unknown);
        assert!(info.browser.is_none());
        assert!(info.os.is_none());
    }
}
