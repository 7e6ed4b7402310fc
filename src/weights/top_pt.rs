//! Top-quark pt reweighting.
//!
//! Each last-copy top and antitop receives `a·exp(b·pt) + c·pt + d`; the event
//! weight is the geometric mean of the two halves. Samples without a ttbar
//! pair at generator level get `1.0`.

use crate::domain::{EventBatch, GenParticle, Metadata, ShapeVariation};
use crate::error::WeightError;
use crate::weights::WeightLambda;

pub const SF_TOP_PT: &str = "sf_top_pt";

/// Samples with a generator-level ttbar pair.
pub const TOP_SAMPLES: [&str; 3] = ["TTbbSemiLeptonic", "TTToSemiLeptonic", "TTTo2L2Nu"];

const A: f64 = 0.103;
const B: f64 = -0.0118;
const C: f64 = -0.000134;
const D: f64 = 0.973;

const TOP_PDG_ID: i32 = 6;

pub fn sf_top_pt() -> WeightLambda {
    WeightLambda::wrap_func(
        SF_TOP_PT,
        |events: &EventBatch, metadata: &Metadata, _: &ShapeVariation| top_pt_weight(events, metadata),
    )
}

/// Per-event top pt weight; all ones for non-top samples.
pub fn top_pt_weight(events: &EventBatch, metadata: &Metadata) -> Result<Vec<f64>, WeightError> {
    if !TOP_SAMPLES.contains(&metadata.sample.as_str()) {
        return Ok(vec![1.0; events.len()]);
    }
    if events.gen_particles.len() != events.len() {
        return Err(WeightError::InvalidOutput {
            name: SF_TOP_PT.to_string(),
            detail: format!(
                "sample '{}' needs generator particles for {} events, found {}",
                metadata.sample,
                events.len(),
                events.gen_particles.len()
            ),
        });
    }

    Ok(events.gen_particles.iter().map(|particles| event_weight(particles)).collect())
}

fn event_weight(particles: &[GenParticle]) -> f64 {
    let mut tops: Vec<&GenParticle> = particles
        .iter()
        .filter(|p| p.has_parent && p.is_last_copy && p.pdg_id.abs() == TOP_PDG_ID)
        .collect();
    // Top first, antitop second.
    tops.sort_by(|a, b| b.pdg_id.cmp(&a.pdg_id));

    match tops.as_slice() {
        [top, antitop, ..] => (half_weight(top.pt) * half_weight(antitop.pt)).sqrt(),
        _ => 1.0,
    }
}

/// Single-top factor, floored at zero so the square root stays real.
fn half_weight(pt: f64) -> f64 {
    (A * (B * pt).exp() + C * pt + D).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn top(pdg_id: i32, pt: f64) -> GenParticle {
        GenParticle {
            pdg_id,
            pt,
            is_last_copy: true,
            has_parent: true,
        }
    }

    #[test]
    fn non_top_sample_is_identity_regardless_of_inputs() {
        let mut events = EventBatch::new(5);
        events.gen_particles = vec![vec![top(6, 900.0), top(-6, 20.0)]; 5];
        let meta = Metadata::new("WJetsToLNu_HT", "2018", 5);
        assert_eq!(top_pt_weight(&events, &meta).unwrap(), vec![1.0; 5]);

        // No generator record at all is fine for a non-top sample.
        let bare = EventBatch::new(3);
        assert_eq!(top_pt_weight(&bare, &meta).unwrap(), vec![1.0; 3]);
    }

    #[test]
    fn geometric_mean_of_top_and_antitop() {
        let mut events = EventBatch::new(1);
        events.gen_particles = vec![vec![top(-6, 200.0), top(6, 100.0), top(5, 50.0)]];
        let meta = Metadata::new("TTToSemiLeptonic", "2018", 1);
        let w = top_pt_weight(&events, &meta).unwrap();
        let expected = (half_weight(100.0) * half_weight(200.0)).sqrt();
        assert_relative_eq!(w[0], expected, epsilon = 1e-12);
        assert!(w[0] > 0.0 && w[0] < 1.1);
    }

    #[test]
    fn intermediate_copies_are_ignored() {
        let mut events = EventBatch::new(1);
        let mut early = top(6, 10.0);
        early.is_last_copy = false;
        events.gen_particles = vec![vec![early, top(6, 100.0), top(-6, 100.0)]];
        let meta = Metadata::new("TTTo2L2Nu", "2018", 1);
        let w = top_pt_weight(&events, &meta).unwrap();
        assert_relative_eq!(w[0], half_weight(100.0), epsilon = 1e-12);
    }

    #[test]
    fn top_sample_without_generator_record_errors() {
        let events = EventBatch::new(2);
        let meta = Metadata::new("TTToSemiLeptonic", "2018", 2);
        assert!(top_pt_weight(&events, &meta).is_err());
    }
}
