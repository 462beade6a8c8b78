//! Configuration adapter (thin, per spec): loads the INI-style config file
//! described in SPEC_FULL.md §6 and resolves it into owned, validated settings.
//!
//! Grounded on `examples/original_source/main.c`'s `GKeyFile`-based
//! `load_config`/`parse_sequence_group`, reimplemented against the `ini` crate
//! because it gives direct group enumeration for the dynamically-named
//! `[sequence NAME]` sections this format needs.

use std::path::{Path, PathBuf};

use ini::Ini;
use serde::{Deserialize, Serialize};

use crate::sequence::RawEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComboLoopMode {
    Final,
    Entire,
}

impl ComboLoopMode {
    pub fn as_repeat_mode(self) -> crate::sequence::RepeatMode {
        match self {
            ComboLoopMode::Final => crate::sequence::RepeatMode::Last,
            ComboLoopMode::Entire => crate::sequence::RepeatMode::Full,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub input: PathBuf,
    pub fps: f64,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub port: u16,
    pub combo_loop_mode: ComboLoopMode,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub enabled: bool,
    pub port: u16,
    pub idle_timeout_ms: u64,
    pub check_interval_ms: u64,
    pub interface: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub stream: StreamSettings,
    pub control: ControlSettings,
    pub monitor: Option<MonitorSettings>,
    pub entries: Vec<RawEntry>,
}

fn strip_quotes(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let conf = Ini::load_from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to parse config '{}': {e}", path.display()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        let stream_section = conf
            .section(Some("stream"))
            .ok_or_else(|| anyhow::anyhow!("missing [stream] section"))?;
        let input_raw = stream_section
            .get("input")
            .ok_or_else(|| anyhow::anyhow!("[stream] missing 'input'"))?;
        let input = {
            let p = PathBuf::from(input_raw);
            if p.is_relative() { base_dir.join(p) } else { p }
        };
        let fps: f64 = stream_section
            .get("fps")
            .ok_or_else(|| anyhow::anyhow!("[stream] missing 'fps'"))?
            .parse()
            .map_err(|_| anyhow::anyhow!("[stream] fps must be a float"))?;
        if !(fps > 0.0) {
            anyhow::bail!("[stream] fps must be > 0");
        }
        let host = stream_section
            .get("host")
            .ok_or_else(|| anyhow::anyhow!("[stream] missing 'host'"))?
            .to_string();
        let port = parse_port(stream_section.get("port"), "[stream] port")?;

        let control = match conf.section(Some("control")) {
            Some(sec) => ControlSettings {
                port: match sec.get("port") {
                    Some(v) => parse_port(Some(v), "[control] port")?,
                    None => 8081,
                },
                combo_loop_mode: match sec.get("combo_loop_mode") {
                    Some("final") | None => ComboLoopMode::Final,
                    Some("entire") => ComboLoopMode::Entire,
                    Some(other) => anyhow::bail!("[control] invalid combo_loop_mode '{other}'"),
                },
            },
            None => ControlSettings { port: 8081, combo_loop_mode: ComboLoopMode::Final },
        };

        let monitor = match conf.section(Some("monitor")) {
            Some(sec) => {
                let enabled = match sec.get("enabled") {
                    Some(v) => parse_bool(v, "[monitor] enabled")?,
                    None => true,
                };
                let port = match sec.get("port") {
                    Some(v) => parse_port(Some(v), "[monitor] port")?,
                    None => port,
                };
                let idle_timeout_ms = match sec.get("idle_timeout_ms") {
                    Some(v) => v.parse().map_err(|_| anyhow::anyhow!("[monitor] idle_timeout_ms must be an integer"))?,
                    None => 1500,
                };
                if idle_timeout_ms < 100 {
                    anyhow::bail!("[monitor] idle_timeout_ms must be >= 100");
                }
                let check_interval_ms = match sec.get("check_interval_ms") {
                    Some(v) => v.parse().map_err(|_| anyhow::anyhow!("[monitor] check_interval_ms must be an integer"))?,
                    None => 250,
                };
                let check_interval_ms = check_interval_ms.max(25);
                let interface = sec.get("interface").map(str::to_string);
                Some(MonitorSettings { enabled, port, idle_timeout_ms, check_interval_ms, interface })
            }
            None => None,
        };

        let mut entries = Vec::new();
        for (section_name, props) in conf.iter() {
            let Some(section_name) = section_name else { continue };
            let Some(rest) = section_name.strip_prefix("sequence ") else { continue };
            let name = strip_quotes(rest);

            let has_order = props.get("order").is_some();
            let has_range = props.get("start").is_some() || props.get("end").is_some();
            if has_order && has_range {
                anyhow::bail!("[sequence {name}] cannot define both 'order' and 'start'/'end'");
            }

            if has_order {
                let order_str = props.get("order").unwrap();
                let order = order_str.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
                let loop_at_end = match props.get("loop_at_end") {
                    Some(v) => parse_bool(v, &format!("[sequence {name}] loop_at_end"))?,
                    None => false,
                };
                entries.push(RawEntry::Combo { name, order, loop_at_end });
            } else {
                let start_frame: u32 = props
                    .get("start")
                    .ok_or_else(|| anyhow::anyhow!("[sequence {name}] missing 'start'"))?
                    .parse()
                    .map_err(|_| anyhow::anyhow!("[sequence {name}] start must be an integer"))?;
                let end_frame: u32 = props
                    .get("end")
                    .ok_or_else(|| anyhow::anyhow!("[sequence {name}] missing 'end'"))?
                    .parse()
                    .map_err(|_| anyhow::anyhow!("[sequence {name}] end must be an integer"))?;
                if start_frame > end_frame {
                    anyhow::bail!("[sequence {name}] start must be <= end");
                }
                entries.push(RawEntry::Sequence { name, start_frame, end_frame });
            }
        }

        if !entries.iter().any(|e| matches!(e, RawEntry::Sequence { .. })) {
            anyhow::bail!("at least one non-combo sequence must be defined");
        }

        Ok(Settings {
            stream: StreamSettings { input, fps, host, port },
            control,
            monitor,
            entries,
        })
    }
}

fn parse_port(raw: Option<&str>, what: &str) -> anyhow::Result<u16> {
    let raw = raw.ok_or_else(|| anyhow::anyhow!("{what} missing"))?;
    let port: u32 = raw.parse().map_err(|_| anyhow::anyhow!("{what} must be an integer"))?;
    if port == 0 || port > 65535 {
        anyhow::bail!("{what} must be in 1..65535");
    }
    Ok(port as u16)
}

fn parse_bool(raw: &str, what: &str) -> anyhow::Result<bool> {
    match raw {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => anyhow::bail!("{what} must be true or false"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_a_minimal_config() {
        let f = write_fixture(
            "[stream]\ninput = stream.h265\nfps = 30\nhost = 127.0.0.1\nport = 5004\n\n[sequence intro]\nstart = 0\nend = 179\n",
        );
        let s = Settings::load(f.path()).unwrap();
        assert_eq!(s.stream.fps, 30.0);
        assert_eq!(s.control.port, 8081);
        assert_eq!(s.entries.len(), 1);
    }

    #[test]
    fn rejects_group_with_both_order_and_range() {
        let f = write_fixture(
            "[stream]\ninput = s.h265\nfps = 30\nhost = 127.0.0.1\nport = 5004\n\n[sequence a]\nstart = 0\nend = 9\n\n[sequence bad]\nstart = 0\nend = 9\norder = a\n",
        );
        assert!(Settings::load(f.path()).is_err());
    }

    #[test]
    fn parses_combo_order_and_loop_flag() {
        let f = write_fixture(
            "[stream]\ninput = s.h265\nfps = 30\nhost = 127.0.0.1\nport = 5004\n\n[sequence a]\nstart = 0\nend = 9\n\n[sequence demo]\norder = a, a\nloop_at_end = true\n",
        );
        let s = Settings::load(f.path()).unwrap();
        let combo = s.entries.iter().find(|e| matches!(e, RawEntry::Combo { .. })).unwrap();
        if let RawEntry::Combo { order, loop_at_end, .. } = combo {
            assert_eq!(order, &vec!["a".to_string(), "a".to_string()]);
            assert!(loop_at_end);
        }
    }
}
