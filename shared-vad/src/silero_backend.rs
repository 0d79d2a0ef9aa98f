//! `silero` VAD backend. Not present in the teacher (which only wires up
//! `earshot`); added because spec §6.3 names `VAD_BACKEND=silero` as a
//! selectable value. Grounded on `ayushmaanbhav-vaak`'s and
//! `saorsa-labs-fae`'s use of `ort` (ONNX Runtime) for on-device model
//! inference — same crate, same feature-gating convention
//! (`onnx = ["dep:ort"]` in vaak's `pipeline` crate).
//!
//! Requires a path to the public `silero_vad.onnx` graph (16kHz variant):
//! inputs `input: [1, N]` f32, `sr: []` i64, `h`/`c: [2, 1, 64]` f32 state;
//! outputs `output: [1, 1]` f32 probability and updated `hn`/`cn` state.

use crate::VoiceActivityDetector;
use ndarray::{Array1, Array3, ArrayD};
use ort::session::Session;
use ort::value::Value;
use std::path::Path;

pub struct SileroVad {
    session: Session,
    threshold: f32,
    h: Array3<f32>,
    c: Array3<f32>,
}

impl SileroVad {
    pub fn load(model_path: impl AsRef<Path>, threshold: f32) -> ort::Result<Self> {
        let session = Session::builder()?.commit_from_file(model_path)?;
        Ok(Self {
            session,
            threshold,
            h: Array3::zeros((2, 1, 64)),
            c: Array3::zeros((2, 1, 64)),
        })
    }

    fn run(&mut self, pcm_f32: &[f32], sample_rate: u32) -> ort::Result<f32> {
        let input = Array1::from_vec(pcm_f32.to_vec()).insert_axis(ndarray::Axis(0));
        let sr = ArrayD::from_elem(ndarray::IxDyn(&[]), sample_rate as i64);

        let outputs = self.session.run(ort::inputs![
            "input" => Value::from_array(input)?,
            "sr" => Value::from_array(sr)?,
            "h" => Value::from_array(self.h.clone())?,
            "c" => Value::from_array(self.c.clone())?,
        ])?;

        let prob = outputs["output"].try_extract_array::<f32>()?;
        let probability = *prob.iter().next().unwrap_or(&0.0);

        if let Ok(hn) = outputs["hn"].try_extract_array::<f32>() {
            self.h = hn.into_owned().into_dimensionality().unwrap_or(self.h.clone());
        }
        if let Ok(cn) = outputs["cn"].try_extract_array::<f32>() {
            self.c = cn.into_owned().into_dimensionality().unwrap_or(self.c.clone());
        }

        Ok(probability)
    }
}

impl VoiceActivityDetector for SileroVad {
    fn is_speech(&mut self, frame: &[i16], sample_rate: u32) -> bool {
        let pcm_f32: Vec<f32> = frame.iter().map(|&s| s as f32 / 32768.0).collect();
        match self.run(&pcm_f32, sample_rate) {
            Ok(probability) => probability >= self.threshold,
            Err(_) => false,
        }
    }

    fn reset(&mut self) {
        self.h.fill(0.0);
        self.c.fill(0.0);
    }
}
