use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use crate::args::ConfigError;

/// Parameter file in the Seismic Unix `key=value` style, one pair per line.
#[derive(Clone, Debug, Default)]
pub struct ParFile {
    values: HashMap<String, String>,
}

fn normalize_key(raw: &str) -> String {
    let key = raw
        .trim()
        .trim_start_matches('-')
        .to_ascii_lowercase()
        .replace('_', "-");
    match key.as_str() {
        "i" | "in" => "input".to_string(),
        "v" => "verbose".to_string(),
        _ => key,
    }
}

impl ParFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let to_err = |e: std::io::Error| ConfigError::ParFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let reader = BufReader::new(File::open(path).map_err(to_err)?);
        let mut text = String::new();
        for line in reader.lines() {
            text.push_str(&line.map_err(to_err)?);
            text.push('\n');
        }
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            if let Some(index) = line.find('=') {
                let (key, value) = line.split_at(index);
                let value = value
                    .trim_start_matches('=')
                    .trim()
                    .trim_matches('"')
                    .trim_matches('\'')
                    .to_string();
                values.insert(normalize_key(key), value);
            }
        }
        Self { values }
    }

    pub fn get<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
            }),
        }
    }
}
