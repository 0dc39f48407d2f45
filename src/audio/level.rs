//! Smoothed RMS and dB SPL metering

/// Linear amplitude to dB (`20 * log10`), clamped below at `floor`.
///
/// Silence gives `-inf` and a NaN input gives NaN; both land on the floor.
pub fn amplitude_to_db(amplitude: f32, floor: f32) -> f32 {
    let db = 20.0 * amplitude.log10();
    if db > floor {
        db
    } else {
        floor
    }
}

/// Power (squared magnitude) to dB (`10 * log10`), clamped below at `floor`.
pub fn power_to_db(power: f32, floor: f32) -> f32 {
    let db = 10.0 * power.log10();
    if db > floor {
        db
    } else {
        floor
    }
}

/// Root mean square of a block of samples
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_square.sqrt()
}

/// Per-channel loudness meter.
///
/// State lives in the caller's feature struct; the meter only holds the
/// coefficients fixed at initialization.
#[derive(Debug, Clone, Copy)]
pub struct LevelMeter {
    smoothing: f32,
    noise_floor_db: f32,
}

impl LevelMeter {
    pub fn new(smoothing: f32, noise_floor_db: f32) -> Self {
        Self {
            smoothing,
            noise_floor_db,
        }
    }

    /// Blend one period into the smoothed RMS and dB SPL values.
    pub fn update(&self, samples: &[f32], rms_out: &mut f32, db_out: &mut f32) {
        *rms_out += (rms(samples) - *rms_out) * self.smoothing;

        let db = amplitude_to_db(*rms_out, self.noise_floor_db);
        *db_out += (db - *db_out) * self.smoothing;
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn noise_floor_db(&self) -> f32 {
        self.noise_floor_db
    }
}
