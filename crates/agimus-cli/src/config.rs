//! Reads and writes `~/.agimus/config.toml`.

use agimus_planning::{ProblemSolverKind, RobotDescription};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted settings of the `agimus` host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket port of the remote-object server.
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// WebSocket port of the rosbridge adapter feeding sensor data.
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,

    /// Naming context the plugin registers in.
    #[serde(default = "default_context_id")]
    pub context_id: String,

    #[serde(default = "default_context_kind")]
    pub context_kind: String,

    #[serde(default)]
    pub problem_solver: ProblemSolverKind,

    /// Publish captured octrees to the scene viewer topic.
    #[serde(default = "default_viewer")]
    pub viewer: bool,

    /// Robot loaded into the problem solver at start-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot: Option<RobotDescription>,
}

fn default_server_port() -> u16 {
    agimus_server::DEFAULT_PORT
}
fn default_bridge_port() -> u16 {
    agimus_middleware::DEFAULT_BRIDGE_PORT
}
fn default_context_id() -> String {
    "hpp".to_string()
}
fn default_context_kind() -> String {
    "corbaserver".to_string()
}
fn default_viewer() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            bridge_port: default_bridge_port(),
            context_id: default_context_id(),
            context_kind: default_context_kind(),
            problem_solver: ProblemSolverKind::default(),
            viewer: default_viewer(),
            robot: None,
        }
    }
}

/// Return the path to `~/.agimus/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".agimus").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `AGIMUS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `AGIMUS_SERVER_PORT` | `server_port` |
/// | `AGIMUS_BRIDGE_PORT` | `bridge_port` |
/// | `AGIMUS_CONTEXT_ID` | `context_id` |
///
/// Unparsable ports are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("AGIMUS_SERVER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.server_port = port;
    }
    if let Ok(v) = std::env::var("AGIMUS_BRIDGE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.bridge_port = port;
    }
    if let Ok(v) = std::env::var("AGIMUS_CONTEXT_ID") {
        cfg.context_id = v;
    }
}

/// Defaults with the `AGIMUS_*` overrides applied; used whenever no config
/// file could be loaded.
pub fn default_with_env() -> Config {
    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg);
    cfg
}

/// Save the config to disk, creating `~/.agimus/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

/// Serializes tests that mutate `AGIMUS_*` variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.context_kind, "corbaserver");
        assert_eq!(loaded.problem_solver, ProblemSolverKind::Manipulation);
        assert!(loaded.viewer);
        assert!(loaded.robot.is_none());
    }

    #[test]
    fn robot_table_is_parsed() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"
problem_solver = "core"
viewer = false

[robot]
name = "ur5"

[[robot.joints]]
name = "shoulder_pan"
type = "revolute"

[[robot.frames]]
name = "camera"
joint = "shoulder_pan"
kind = "sensor"
"#,
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.problem_solver, ProblemSolverKind::Core);
        assert!(!cfg.viewer);
        let robot = cfg.robot.expect("robot table");
        assert_eq!(robot.name, "ur5");
        assert_eq!(robot.joints.len(), 1);
        assert_eq!(robot.frames[0].name, "camera");

        // A config with a robot survives a save/load cycle.
        let cfg = load_from(&path).unwrap().unwrap();
        save_to(&cfg, &path).expect("save");
        assert_eq!(load_from(&path).unwrap().unwrap().robot, cfg.robot);
    }

    #[test]
    fn defaults_match_the_service_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.server_port, 13331);
        assert_eq!(cfg.bridge_port, 9090);
        assert_eq!(cfg.context_id, "hpp");
    }

    #[test]
    fn config_path_points_to_agimus_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".agimus"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server_port = \"not a number\"").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.starts_with("Failed to parse config"));
    }

    #[test]
    fn apply_env_overrides_changes_server_port() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env mutation is serialized by ENV_LOCK.
        unsafe { std::env::set_var("AGIMUS_SERVER_PORT", "14000") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.server_port, 14000);
        unsafe { std::env::remove_var("AGIMUS_SERVER_PORT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env mutation is serialized by ENV_LOCK.
        unsafe { std::env::set_var("AGIMUS_BRIDGE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.bridge_port, 9090);
        unsafe { std::env::remove_var("AGIMUS_BRIDGE_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_context_id() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env mutation is serialized by ENV_LOCK.
        unsafe { std::env::set_var("AGIMUS_CONTEXT_ID", "robot-1") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.context_id, "robot-1");
        unsafe { std::env::remove_var("AGIMUS_CONTEXT_ID") };
    }

    #[test]
    fn fallback_defaults_honour_env_overrides() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        // SAFETY: env mutation is serialized by ENV_LOCK.
        unsafe { std::env::set_var("AGIMUS_SERVER_PORT", "14001") };
        let cfg = default_with_env();
        unsafe { std::env::remove_var("AGIMUS_SERVER_PORT") };
        assert_eq!(cfg.server_port, 14001);
        assert_eq!(cfg.context_kind, "corbaserver");
    }
}
