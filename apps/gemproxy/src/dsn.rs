use std::error::Error;
use std::fs::OpenOptions;
use std::path::PathBuf;

const DEFAULT_DSN: &str = "sqlite://./data/gproxy.db?mode=rwc";

pub(crate) fn resolve_dsn(input: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
    let dsn = if input.trim().is_empty() {
        DEFAULT_DSN.to_string()
    } else {
        input.to_string()
    };
    ensure_sqlite_dsn(&dsn)?;
    Ok(dsn)
}

pub(crate) fn ensure_sqlite_dsn(dsn: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    if !dsn.starts_with("sqlite:") {
        return Ok(());
    }

    let mut rest = &dsn["sqlite:".len()..];
    if rest.starts_with("//") {
        rest = &rest[2..];
    }
    if rest.is_empty() {
        return Ok(());
    }
    if rest.starts_with(":memory:") || rest.starts_with("memory:") {
        return Ok(());
    }

    let path_part = rest.split('?').next().unwrap_or("");
    if path_part.is_empty() {
        return Ok(());
    }

    let path = PathBuf::from(path_part);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_falls_back_to_the_default_dsn() {
        let resolved = resolve_dsn("").unwrap();
        assert_eq!(resolved, DEFAULT_DSN);
        let _ = std::fs::remove_dir_all("./data");
    }

    #[test]
    fn explicit_dsn_is_kept_verbatim() {
        let resolved = resolve_dsn("sqlite::memory:").unwrap();
        assert_eq!(resolved, "sqlite::memory:");
    }
}
