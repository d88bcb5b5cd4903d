use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::drivers::pipeline::Analysis;
use crate::model::unix_millis;

/// Writes per-frame ROI colour means and pulse samples as CSV for offline analysis.
pub struct SignalRecorder {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
    rows: usize,
}

impl SignalRecorder {
    pub fn new() -> Self {
        Self { writer: None, path: None, rows: 0 }
    }

    /// Opens `rppg_<label>_<unix millis>.csv` in `dir` and writes the header.
    pub fn start(&mut self, dir: &Path, label: &str) -> io::Result<PathBuf> {
        self.stop()?;
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("rppg_{}_{}.csv", label, unix_millis()));
        let mut w = BufWriter::new(File::create(&path)?);
        writeln!(w, "t,r,g,b,raw,conditioned")?;
        self.writer = Some(w);
        self.path = Some(path.clone());
        self.rows = 0;
        info!("recording signals to {}", path.display());
        Ok(path)
    }

    /// Flushes and closes the file, returning its path.
    pub fn stop(&mut self) -> io::Result<Option<PathBuf>> {
        if let Some(mut w) = self.writer.take() {
            w.flush()?;
            info!("saved {} rows", self.rows);
        }
        Ok(self.path.take())
    }

    pub fn write_record(&mut self, t: f32, rgb: [f32; 3], raw: f32, conditioned: f32) -> io::Result<()> {
        if let Some(w) = &mut self.writer {
            writeln!(
                w,
                "{:.4},{:.3},{:.3},{:.3},{:.6},{:.6}",
                t, rgb[0], rgb[1], rgb[2], raw, conditioned
            )?;
            self.rows += 1;
        }
        Ok(())
    }

    /// One row per frame of the analysed window.
    pub fn write_analysis(&mut self, analysis: &Analysis) -> io::Result<usize> {
        let trace = &analysis.trace;
        let fs = trace.sample_rate_hz.max(f32::EPSILON);
        let raw = analysis.raw.samples();
        let conditioned = analysis.conditioned.samples();
        let n = trace.len().min(raw.len()).min(conditioned.len());
        for i in 0..n {
            let rgb = [trace.red[i], trace.green[i], trace.blue[i]];
            self.write_record(i as f32 / fs, rgb, raw[i], conditioned[i])?;
        }
        Ok(n)
    }

    pub fn is_recording(&self) -> bool {
        self.writer.is_some()
    }
}

impl Default for SignalRecorder {
    fn default() -> Self {
        Self::new()
    }
}
