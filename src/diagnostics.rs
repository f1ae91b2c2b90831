use std::path::Path;

use crate::config::Config;

pub fn check(cfg: &Config, data_dir: &Path) -> anyhow::Result<()> {
    let mut errors: Vec<String> = Vec::new();

    // Check 1: data directory writable
    let scratch = data_dir.join(".write-test");
    match std::fs::write(&scratch, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&scratch);
        }
        Err(e) => errors.push(format!(
            "cannot write to {}: {e}\n  \
             → pass --data-dir with a writable directory",
            data_dir.display()
        )),
    }

    // Check 2: pinentry binary found
    match std::process::Command::new(&cfg.pinentry)
        .arg("--version")
        .output()
    {
        Ok(_) => {}
        Err(e) => errors.push(format!(
            "pinentry binary not found: '{}': {e}\n  \
             → install pinentry, or pass --pinentry <path>",
            cfg.pinentry
        )),
    }

    // Check 3: timeout sane
    if cfg.confirm_timeout_secs == 0 {
        errors.push("--confirm-timeout-secs must be at least 1".to_string());
    }

    if errors.is_empty() {
        return Ok(());
    }

    for err in &errors {
        eprintln!("ERROR: {err}");
    }
    anyhow::bail!("{} preflight check(s) failed", errors.len());
}
