use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Replays a fixed script of per-frame detections, looping at the end.
///
/// The script file is a JSON array with one entry per frame, each entry a list of
/// `{"label", "conf", "x1", "y1", "x2", "y2"}` objects in pixel coordinates.
#[derive(Debug)]
pub struct ReplayBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl ReplayBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Result<Self> {
        if script.is_empty() {
            return Err(anyhow!("replay script must contain at least one frame"));
        }
        Ok(Self { script, cursor: 0 })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read replay script {}", path.display()))?;
        let script: Vec<Vec<Detection>> = serde_json::from_str(&raw)
            .with_context(|| format!("parse replay script {}", path.display()))?;
        Self::new(script)
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        let detections = self.script[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.script.len();
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use std::io::Write;

    #[test]
    fn replay_cycles_through_script() {
        let person = Detection::new("person", 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let mut backend = ReplayBackend::new(vec![vec![person.clone()], vec![]]).unwrap();
        assert_eq!(backend.detect(&[], 0, 0).unwrap(), vec![person.clone()]);
        assert!(backend.detect(&[], 0, 0).unwrap().is_empty());
        assert_eq!(backend.detect(&[], 0, 0).unwrap(), vec![person]);
    }

    #[test]
    fn replay_rejects_empty_script() {
        assert!(ReplayBackend::new(Vec::new()).is_err());
    }

    #[test]
    fn replay_loads_json_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"[[{"label": "person", "conf": 0.8, "x1": 100, "y1": 100, "x2": 540, "y2": 380}], []]"#,
        )
        .unwrap();
        let mut backend = ReplayBackend::from_path(file.path()).unwrap();
        assert_eq!(backend.len(), 2);
        let first = backend.detect(&[], 640, 480).unwrap();
        assert_eq!(first[0].label, "person");
        assert_eq!(first[0].bbox, BoundingBox::new(100.0, 100.0, 540.0, 380.0));
    }
}
