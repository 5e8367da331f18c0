use std::{env, path::PathBuf};

use anyhow::{Result, anyhow};

const DEFAULT_CONFIG_FILE: &str = "persona-budget.jsonc";

pub fn config_path_from_args() -> Result<PathBuf> {
    config_path_from(env::args().skip(1))
}

fn config_path_from(mut args: impl Iterator<Item = String>) -> Result<PathBuf> {
    let first = args.next();

    if args.next().is_some() {
        return Err(anyhow!(
            "expected at most one argument: <config-path>. usage: persona-budget [./{DEFAULT_CONFIG_FILE}]"
        ));
    }

    match first {
        Some(path) => Ok(PathBuf::from(path)),
        None => {
            let mut path = env::current_dir()?;
            path.push(DEFAULT_CONFIG_FILE);
            Ok(path)
        }
    }
}
