//! Scene Save Files
//!
//! Binary little-endian per-scene saves under the save directory:
//! `current_save.sav` with a `save.bak` fallback rotated on every write.
//! The format is versioned: `u32` magic, `u32` version, then the primary
//! camera's eye and Euler angles (degrees).

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use glam::Vec3;
use log::warn;

use crate::errors::{DivideError, Result};
use crate::scene::camera::Camera;

/// "DIVD", little-endian.
pub const SAVE_MAGIC: u32 = 0x4456_4944;
pub const SAVE_VERSION: u32 = 1;

/// The persisted camera state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub eye: Vec3,
    pub euler_degrees: Vec3,
}

impl CameraPose {
    #[must_use]
    pub fn of(camera: &Camera) -> Self {
        Self {
            eye: camera.eye(),
            euler_degrees: camera.euler_degrees(),
        }
    }

    /// Applies the pose to a camera and refreshes its matrices.
    pub fn apply(&self, camera: &mut Camera) {
        camera.set_eye(self.eye);
        camera.set_euler_degrees(self.euler_degrees);
        camera.update();
    }
}

fn save_path(dir: &Path, scene: &str) -> PathBuf {
    dir.join(scene).join("current_save.sav")
}

fn backup_path(dir: &Path, scene: &str) -> PathBuf {
    dir.join(scene).join("save.bak")
}

fn write_vec3(out: &mut impl Write, v: Vec3) -> std::io::Result<()> {
    for component in [v.x, v.y, v.z] {
        out.write_all(&component.to_le_bytes())?;
    }
    Ok(())
}

fn read_vec3(input: &mut impl Read) -> std::io::Result<Vec3> {
    let mut bytes = [0u8; 12];
    input.read_exact(&mut bytes)?;
    Ok(Vec3::new(
        f32::from_le_bytes(bytes[0..4].try_into().expect("sized slice")),
        f32::from_le_bytes(bytes[4..8].try_into().expect("sized slice")),
        f32::from_le_bytes(bytes[8..12].try_into().expect("sized slice")),
    ))
}

/// Writes the scene save, rotating any previous save to `save.bak`.
pub fn save_scene(dir: &Path, scene: &str, pose: &CameraPose) -> Result<()> {
    let path = save_path(dir, scene);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        if let Err(err) = std::fs::rename(&path, backup_path(dir, scene)) {
            warn!("save rotation failed: {err}");
        }
    }

    let mut out = Vec::with_capacity(8 + 24);
    out.extend_from_slice(&SAVE_MAGIC.to_le_bytes());
    out.extend_from_slice(&SAVE_VERSION.to_le_bytes());
    write_vec3(&mut out, pose.eye)?;
    write_vec3(&mut out, pose.euler_degrees)?;
    std::fs::write(&path, out)?;
    Ok(())
}

fn load_file(path: &Path) -> Result<CameraPose> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < 8 {
        return Err(DivideError::SaveCorrupt(format!(
            "{}: truncated header",
            path.display()
        )));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().expect("sized slice"));
    if magic != SAVE_MAGIC {
        return Err(DivideError::SaveCorrupt(format!(
            "{}: bad magic {magic:#010x}",
            path.display()
        )));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().expect("sized slice"));
    if version != SAVE_VERSION {
        return Err(DivideError::SaveVersion(version));
    }

    let mut cursor = &bytes[8..];
    let eye = read_vec3(&mut cursor).map_err(|_| {
        DivideError::SaveCorrupt(format!("{}: truncated camera block", path.display()))
    })?;
    let euler_degrees = read_vec3(&mut cursor).map_err(|_| {
        DivideError::SaveCorrupt(format!("{}: truncated camera block", path.display()))
    })?;
    Ok(CameraPose { eye, euler_degrees })
}

/// Loads the scene save, falling back to `save.bak` when the primary file
/// is missing or corrupt.
pub fn load_scene(dir: &Path, scene: &str) -> Result<CameraPose> {
    match load_file(&save_path(dir, scene)) {
        Ok(pose) => Ok(pose),
        Err(primary_err) => {
            warn!("primary save unreadable ({primary_err}); trying backup");
            load_file(&backup_path(dir, scene)).map_err(|_| primary_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("divide-save-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn round_trip_within_tolerance() {
        let dir = temp_dir("roundtrip");
        let pose = CameraPose {
            eye: Vec3::new(10.0, 20.0, 30.0),
            euler_degrees: Vec3::new(-30.0, 45.0, 0.0),
        };
        save_scene(&dir, "default", &pose).unwrap();
        let loaded = load_scene(&dir, "default").unwrap();
        assert!((loaded.eye - pose.eye).length() < 1e-5);
        assert!((loaded.euler_degrees - pose.euler_degrees).length() < 1e-5);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_primary_falls_back_to_backup() {
        let dir = temp_dir("backup");
        let pose = CameraPose {
            eye: Vec3::ONE,
            euler_degrees: Vec3::ZERO,
        };
        // Two saves: the first rotates into save.bak on the second write.
        save_scene(&dir, "default", &pose).unwrap();
        save_scene(&dir, "default", &pose).unwrap();
        // Corrupt the primary.
        std::fs::write(dir.join("default").join("current_save.sav"), b"junk").unwrap();

        let loaded = load_scene(&dir, "default").unwrap();
        assert!((loaded.eye - Vec3::ONE).length() < 1e-6);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bad_magic_and_version_are_rejected() {
        let dir = temp_dir("magic");
        std::fs::create_dir_all(dir.join("default")).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xDEAD_BEEF_u32.to_le_bytes());
        bytes.extend_from_slice(&SAVE_VERSION.to_le_bytes());
        std::fs::write(dir.join("default").join("current_save.sav"), &bytes).unwrap();
        assert!(matches!(
            load_scene(&dir, "default"),
            Err(DivideError::SaveCorrupt(_))
        ));

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SAVE_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&99_u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 24]);
        std::fs::write(dir.join("default").join("current_save.sav"), &bytes).unwrap();
        assert!(matches!(
            load_scene(&dir, "default"),
            Err(DivideError::SaveVersion(99))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
