use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{IoError, TraderError, TraderResult};

// ================================================================================================
// Serde Formats
// ================================================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    PartialOrd,
    Eq,
    Hash,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
    Default,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SerdeFormat {
    #[default]
    Postcard,
    Json,
}

impl SerdeFormat {
    pub fn from_path(path: &Path) -> TraderResult<Self> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| err(&path.display().to_string(), true))?;

        match ext.to_lowercase().as_str() {
            "postcard" => Ok(Self::Postcard),
            "json" => Ok(Self::Json),
            ext => Err(err(ext, false)),
        }
    }

    /// Serializes `value` into `path`, replacing any existing file.
    pub fn write<T: Serialize>(&self, value: &T, path: &Path) -> TraderResult<()> {
        let file = File::create(path).map_err(IoError::from)?;
        let mut writer = BufWriter::new(file);
        match self {
            Self::Postcard => {
                let bytes = postcard::to_stdvec(value).map_err(IoError::from)?;
                writer.write_all(&bytes).map_err(IoError::from)?;
            }
            Self::Json => serde_json::to_writer_pretty(&mut writer, value).map_err(IoError::from)?,
        }
        writer.flush().map_err(IoError::from)?;
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(&self, path: &Path) -> TraderResult<T> {
        if !path.exists() {
            return Err(IoError::NotFound(path.display().to_string()).into());
        }
        let file = File::open(path).map_err(IoError::from)?;
        let mut reader = BufReader::new(file);
        match self {
            Self::Postcard => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes).map_err(IoError::from)?;
                Ok(postcard::from_bytes(&bytes).map_err(IoError::from)?)
            }
            Self::Json => Ok(serde_json::from_reader(reader).map_err(IoError::from)?),
        }
    }
}

fn err(s: &str, missing_extension: bool) -> TraderError {
    let msg = if missing_extension {
        format!("Unsupported file format: missing or invalid extension in path '{s}'")
    } else {
        format!("Unsupported file format: '{s}'")
    };
    IoError::UnsupportedFormat(msg).into()
}

// ================================================================================================
// Output Naming
// ================================================================================================

/// Builds an output path in `dir` that does not overwrite an existing file.
///
/// Returns `dir/name.ext` when free, otherwise `dir/name_1.ext`, `dir/name_2.ext`, ...
/// The directory must exist.
pub fn valid_output_name(dir: &Path, name: &str, ext: &str) -> TraderResult<PathBuf> {
    if !dir.is_dir() {
        return Err(IoError::NotFound(dir.display().to_string()).into());
    }

    let mut candidate = dir.join(format!("{name}.{ext}"));
    let mut idx = 1;
    while candidate.is_file() {
        candidate = dir.join(format!("{name}_{idx}.{ext}"));
        idx += 1;
    }
    Ok(candidate)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("qtrader-io-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            SerdeFormat::from_path(Path::new("a/b/policy.postcard")).unwrap(),
            SerdeFormat::Postcard
        );
        assert_eq!(
            SerdeFormat::from_path(Path::new("strategy.JSON")).unwrap(),
            SerdeFormat::Json
        );
        assert!(SerdeFormat::from_path(Path::new("model.h5")).is_err());
        assert!(SerdeFormat::from_path(Path::new("model")).is_err());
    }

    #[test]
    fn test_write_then_read_both_formats() {
        let dir = scratch_dir("formats");
        let mut value = BTreeMap::new();
        value.insert("budget".to_string(), 1000.5_f64);

        for format in [SerdeFormat::Postcard, SerdeFormat::Json] {
            let path = dir.join(format!("value.{format}"));
            format.write(&value, &path).unwrap();
            let back: BTreeMap<String, f64> = format.read(&path).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_valid_output_name_skips_existing_files() {
        let dir = scratch_dir("naming");
        let first = valid_output_name(&dir, "portfolio", "csv").unwrap();
        assert_eq!(first, dir.join("portfolio.csv"));

        std::fs::write(&first, "x").unwrap();
        let second = valid_output_name(&dir, "portfolio", "csv").unwrap();
        assert_eq!(second, dir.join("portfolio_1.csv"));

        std::fs::write(&second, "x").unwrap();
        let third = valid_output_name(&dir, "portfolio", "csv").unwrap();
        assert_eq!(third, dir.join("portfolio_2.csv"));

        assert!(valid_output_name(&dir.join("missing"), "p", "csv").is_err());
    }
}
