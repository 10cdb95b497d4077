use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::config::CategoryRuleConfig;

pub const OTHER_CATEGORY: &str = "Other";

const OTHER_DESCRIPTION: &str = "Miscellaneous services that don't fit into standard categories";
const CUSTOM_DESCRIPTION: &str = "Custom category defined in configuration";

const BUILTIN_RULES: &[(&str, &[&str], &str)] = &[
    (
        "System Core",
        &["systemd", "kernel", "udev", "dbus", "polkit"],
        "Essential low-level services that provide basic system functionality",
    ),
    (
        "Network Services",
        &["network", "wifi", "bluetooth", "ssh", "vpn", "firewall"],
        "Services that manage network connectivity, protocols, and security",
    ),
    (
        "Desktop Environment",
        &["gdm", "gnome", "kde", "xorg", "wayland", "display"],
        "Services that provide graphical user interface and window management",
    ),
    (
        "Security & Authentication",
        &["auth", "sudo", "security", "keyring", "login"],
        "Services that handle user authentication and system security",
    ),
    (
        "Hardware & Drivers",
        &["audio", "sound", "pulse", "alsa", "printer", "cups", "usb"],
        "Services that manage hardware devices and drivers",
    ),
    (
        "User Services",
        &["user@", "session", "at.service", "cron"],
        "Services that run in user sessions and provide user-specific functionality",
    ),
    (
        "Development Tools",
        &["docker", "git", "dev", "build", "compile"],
        "Services related to software development and programming tools",
    ),
    (
        "Media & Graphics",
        &["media", "video", "graphics", "camera"],
        "Services that handle multimedia, graphics, and audio/video processing",
    ),
];

const SERVICE_NOTES: &[(&str, &str)] = &[
    (
        "networkmanager",
        "Manages network connections including WiFi, Ethernet, and VPN. Essential for internet connectivity.",
    ),
    (
        "gdm",
        "GNOME Display Manager - handles user login screen and session management in GNOME desktop environments.",
    ),
    (
        "systemd-resolved",
        "Provides network name resolution (DNS) services. Converts domain names to IP addresses.",
    ),
    (
        "dbus",
        "Desktop Bus - enables communication between applications and system services. Critical for desktop functionality.",
    ),
    (
        "pulseaudio",
        "Audio server that manages sound devices and audio streams. Handles all audio input/output.",
    ),
    (
        "bluetooth",
        "Manages Bluetooth devices like wireless headphones, mice, and keyboards.",
    ),
    (
        "systemd-logind",
        "Handles user logins, sessions, and power management events like suspend/hibernate.",
    ),
    (
        "systemd-timesyncd",
        "Keeps system clock synchronized with network time servers (NTP).",
    ),
    (
        "cups",
        "Common Unix Printing System - manages printers and print jobs.",
    ),
    (
        "firewalld",
        "Dynamic firewall management tool that controls network traffic for security.",
    ),
];

const GENERIC_NOTE: &str =
    "A system service that provides specific functionality. Check the description for more details.";

pub const CRITICAL_SERVICES: [&str; 8] = [
    "systemd-logind.service",
    "dbus.service",
    "NetworkManager.service",
    "systemd-resolved.service",
    "systemd-timesyncd.service",
    "gdm.service",
    "pulseaudio.service",
    "bluetooth.service",
];

const IMPORTANCE: &[(&str, &str)] = &[
    (
        "systemd-logind.service",
        "Manages user sessions and power events. Without it, you can't log in or manage power states.",
    ),
    (
        "dbus.service",
        "Inter-process communication system. Many desktop applications won't work without it.",
    ),
    (
        "NetworkManager.service",
        "Manages all network connections. No internet or network access without it.",
    ),
    (
        "systemd-resolved.service",
        "DNS resolution service. Websites won't load without proper name resolution.",
    ),
    (
        "systemd-timesyncd.service",
        "Keeps system time accurate. Important for security certificates and logs.",
    ),
    (
        "gdm.service",
        "Login manager for GNOME. You can't log into the desktop without it.",
    ),
    (
        "pulseaudio.service",
        "Audio system. No sound from applications without it.",
    ),
    (
        "bluetooth.service",
        "Bluetooth device management. Wireless peripherals won't work without it.",
    ),
];

const TROUBLESHOOTING: &[(&str, &str)] = &[
    (
        "systemd-logind.service",
        "If failed, check for conflicting display managers or permission issues.",
    ),
    (
        "dbus.service",
        "If failed, system may be severely broken. Check system logs and consider reboot.",
    ),
    (
        "NetworkManager.service",
        "If failed, check network configuration and try 'systemctl restart NetworkManager'.",
    ),
    (
        "systemd-resolved.service",
        "If failed, DNS won't work. Check /etc/systemd/resolved.conf configuration.",
    ),
    (
        "systemd-timesyncd.service",
        "If failed, time sync is broken. Check network connectivity and NTP servers.",
    ),
    (
        "gdm.service",
        "If failed, you can't access desktop. Try switching to different display manager or TTY login.",
    ),
    (
        "pulseaudio.service",
        "If failed, restart it or check audio device permissions and configuration.",
    ),
    (
        "bluetooth.service",
        "If failed, restart it or check if Bluetooth hardware is enabled in BIOS.",
    ),
];

const GENERIC_IMPORTANCE: &str =
    "Important system service that provides essential functionality.";

#[derive(Debug, Clone)]
pub struct CategoryRule {
    name: String,
    keywords: Vec<String>,
    description: String,
}

impl CategoryRule {
    fn matches(&self, lowered_unit: &str) -> bool {
        self.keywords.iter().any(|k| lowered_unit.contains(k.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct CategoryTable {
    rules: Vec<CategoryRule>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CategoryTable {
    pub fn builtin() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .map(|(name, keywords, description)| CategoryRule {
                name: name.to_string(),
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
                description: description.to_string(),
            })
            .collect();
        Self { rules }
    }

    pub fn from_config(rules: &[CategoryRuleConfig]) -> Self {
        let rules = rules
            .iter()
            .map(|r| CategoryRule {
                name: r.name.clone(),
                keywords: r.keywords.iter().map(|k| k.to_lowercase()).collect(),
                description: r
                    .description
                    .clone()
                    .unwrap_or_else(|| CUSTOM_DESCRIPTION.to_string()),
            })
            .collect();
        Self { rules }
    }

    pub fn classify(&self, unit_name: &str) -> &str {
        let lowered = unit_name.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.name.as_str())
            .unwrap_or(OTHER_CATEGORY)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .map(|r| r.name.as_str())
            .chain(std::iter::once(OTHER_CATEGORY))
    }

    pub fn descriptions(&self) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = self
            .rules
            .iter()
            .map(|r| (r.name.clone(), r.description.clone()))
            .collect();
        out.insert(OTHER_CATEGORY.to_string(), OTHER_DESCRIPTION.to_string());
        out
    }
}

pub fn annotate(unit_name: &str) -> &'static str {
    let lowered = unit_name.to_lowercase();
    SERVICE_NOTES
        .iter()
        .find(|(key, _)| lowered.contains(key))
        .map(|(_, note)| *note)
        .unwrap_or(GENERIC_NOTE)
}

pub fn importance(unit_name: &str) -> &'static str {
    lookup(IMPORTANCE, unit_name).unwrap_or(GENERIC_IMPORTANCE)
}

pub fn troubleshooting(unit_name: &str) -> Cow<'static, str> {
    match lookup(TROUBLESHOOTING, unit_name) {
        Some(tip) => Cow::Borrowed(tip),
        None => Cow::Owned(format!(
            "Check service logs with 'journalctl -u {unit_name}' for error details."
        )),
    }
}

fn lookup(table: &[(&str, &'static str)], unit_name: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(name, _)| *name == unit_name)
        .map(|(_, text)| *text)
}
