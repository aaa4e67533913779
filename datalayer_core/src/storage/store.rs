use std::{
    fs, io,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::warn;
use serde_json::Error as SerdeError;

use super::profile::Profile;

#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    /// `~/.config/datalayer/profiles` on Linux, `%APPDATA%\datalayer\profiles` on Windows, etc.
    pub fn new() -> io::Result<Self> {
        let proj = ProjectDirs::from("", "", "datalayer").ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "Unable to locate config dir")
        })?;
        Self::at(proj.config_dir().join("profiles"))
    }

    /// Use `dir` instead of the per-user config directory; it is created if missing.
    pub fn at(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Profile names map to files directly inside `dir`, never outside it.
    fn file_for(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid profile name {name:?}"),
            ));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Returns every stored profile, sorted by name (silently skips malformed files).
    pub fn list(&self) -> io::Result<Vec<Profile>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            match read_profile(&path) {
                Ok(profile) => out.push(profile),
                Err(e) => warn!("Could not read profile {:?}: {e}", path),
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Look up one profile; `Ok(None)` if it doesn’t exist.
    pub fn get(&self, name: &str) -> io::Result<Option<Profile>> {
        match read_profile(&self.file_for(name)?) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or overwrite a profile.
    pub fn save(&self, profile: &Profile) -> io::Result<()> {
        let file = fs::File::create(self.file_for(profile.name())?)?;
        serde_json::to_writer_pretty(file, profile).map_err(SerdeError::into)
    }

    /// Delete a profile (`Ok(true)` if removed, `Ok(false)` if it didn’t exist).
    pub fn delete(&self, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.file_for(name)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn read_profile(path: &Path) -> io::Result<Profile> {
    let file = fs::File::open(path)?;
    serde_json::from_reader(file).map_err(SerdeError::into)
}
