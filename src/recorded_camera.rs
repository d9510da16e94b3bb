//! Recorded-camera file I/O (§6 "Persisted state").
//!
//! Format: a little-endian `int32` count followed by that many records of
//! `{ vec3 pos; vec3 lookAt; vec3 up; vec3 right; mat4 view; mat4 proj }`
//! in natural IEEE-754 / column-major layout. The file is rewritten in
//! full on every append, matching the source's behavior, rather than
//! appended-to incrementally.

use std::io::{self, Read, Write};
use std::path::Path;

use glam::{Mat4, Vec3};

use crate::camera::RecordedCameraState;

const RECORD_SIZE: usize = 3 * 4 * 4 + 16 * 4 * 2;

fn write_vec3(out: &mut Vec<u8>, v: Vec3) {
    out.extend_from_slice(&v.x.to_le_bytes());
    out.extend_from_slice(&v.y.to_le_bytes());
    out.extend_from_slice(&v.z.to_le_bytes());
}

fn write_mat4(out: &mut Vec<u8>, m: Mat4) {
    for column in m.to_cols_array() {
        out.extend_from_slice(&column.to_le_bytes());
    }
}

fn read_vec3(bytes: &[u8]) -> Vec3 {
    Vec3::new(
        f32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        f32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        f32::from_le_bytes(bytes[8..12].try_into().unwrap()),
    )
}

fn read_mat4(bytes: &[u8]) -> Mat4 {
    let mut columns = [0.0f32; 16];
    for (i, chunk) in bytes.chunks_exact(4).take(16).enumerate() {
        columns[i] = f32::from_le_bytes(chunk.try_into().unwrap());
    }
    Mat4::from_cols_array(&columns)
}

fn encode(records: &[RecordedCameraState]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + records.len() * RECORD_SIZE);
    out.extend_from_slice(&(records.len() as i32).to_le_bytes());

    for record in records {
        write_vec3(&mut out, record.pos);
        write_vec3(&mut out, record.look_at);
        write_vec3(&mut out, record.up);
        write_vec3(&mut out, record.right);
        write_mat4(&mut out, record.view);
        write_mat4(&mut out, record.proj);
    }

    out
}

fn decode(bytes: &[u8]) -> io::Result<Vec<RecordedCameraState>> {
    if bytes.len() < 4 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "missing record count"));
    }

    let count = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if count < 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "negative record count"));
    }
    let count = count as usize;

    let expected_len = 4 + count * RECORD_SIZE;
    if bytes.len() != expected_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected {expected_len} bytes, got {}", bytes.len()),
        ));
    }

    let mut records = Vec::with_capacity(count);
    let mut cursor = 4;
    for _ in 0..count {
        let record = &bytes[cursor..cursor + RECORD_SIZE];
        let pos = read_vec3(&record[0..12]);
        let look_at = read_vec3(&record[12..24]);
        let up = read_vec3(&record[24..36]);
        let right = read_vec3(&record[36..48]);
        let view = read_mat4(&record[48..112]);
        let proj = read_mat4(&record[112..176]);

        records.push(RecordedCameraState { pos, look_at, up, right, view, proj });
        cursor += RECORD_SIZE;
    }

    Ok(records)
}

/// The recorded-camera file backing one scene. Missing or corrupt files
/// are a recoverable `RecordedCameraIOFailure` (§7): `load` returns an
/// empty list and logs a warning rather than failing the caller.
pub struct RecordedCameraFile {
    path: std::path::PathBuf,
    records: Vec<RecordedCameraState>,
}

impl RecordedCameraFile {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let records = match std::fs::File::open(&path) {
            Ok(mut file) => {
                let mut bytes = Vec::new();
                match file.read_to_end(&mut bytes).and_then(|_| decode(&bytes)) {
                    Ok(records) => records,
                    Err(err) => {
                        log::warn!("recorded camera file {path:?} is corrupt ({err}), ignoring");
                        Vec::new()
                    }
                }
            }
            Err(err) => {
                log::warn!("no recorded camera file at {path:?} ({err})");
                Vec::new()
            }
        };

        Self { path, records }
    }

    pub fn records(&self) -> &[RecordedCameraState] {
        &self.records
    }

    pub fn get(&self, index: usize) -> Option<&RecordedCameraState> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record and rewrite the whole file. A write failure is
    /// logged and swallowed, not propagated, per §7's recoverable policy.
    pub fn append(&mut self, record: RecordedCameraState) {
        self.records.push(record);

        if let Err(err) = self.write_all() {
            log::warn!("failed to persist recorded camera file {:?}: {err}", self.path);
        }
    }

    fn write_all(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(&encode(&self.records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seed: f32) -> RecordedCameraState {
        RecordedCameraState {
            pos: Vec3::splat(seed),
            look_at: Vec3::new(seed, 0.0, -seed),
            up: Vec3::Y,
            right: Vec3::X,
            view: Mat4::from_translation(Vec3::splat(seed)),
            proj: Mat4::perspective_rh(1.0, 16.0 / 9.0, 0.1, 100.0),
        }
    }

    #[test]
    fn round_trip_via_encode_decode() {
        let records = vec![sample(1.0), sample(2.0)];
        let bytes = encode(&records);
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.len(), records.len());
        for (a, b) in records.iter().zip(decoded.iter()) {
            assert_eq!(a.pos, b.pos);
            assert_eq!(a.view, b.view);
            assert_eq!(a.proj, b.proj);
        }
    }

    #[test]
    fn append_then_reload_yields_same_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene_recorded_camera");

        let mut file = RecordedCameraFile::load(&path);
        assert!(file.is_empty());

        file.append(sample(1.0));
        file.append(sample(2.0));

        let reloaded = RecordedCameraFile::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(0).unwrap().pos, sample(1.0).pos);
        assert_eq!(reloaded.get(1).unwrap().pos, sample(2.0).pos);
    }

    #[test]
    fn missing_file_yields_empty_list_not_error() {
        let file = RecordedCameraFile::load("/nonexistent/path/scene_recorded_camera");
        assert!(file.is_empty());
    }

    #[test]
    fn corrupt_file_yields_empty_list_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt");
        std::fs::write(&path, [1, 2, 3]).unwrap();

        let file = RecordedCameraFile::load(&path);
        assert!(file.is_empty());
    }
}
