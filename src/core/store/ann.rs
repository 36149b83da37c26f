//! ANN Primitives
//!
//! Distance metrics, IVF centroid selection, and vector blob encoding
//! for the store. Centroid selection is seeded so an index build over
//! the same rows is reproducible.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::core::config::DistanceMetric;

/// Seed for centroid sampling. Fixed so rebuilds over identical data
/// produce identical list assignments.
const CENTROID_SEED: u64 = 42;

// =============================================================================
// Distance
// =============================================================================

/// Distance under the given metric. Lower is always better; the
/// inner-product metric is negated dot product so that convention holds.
///
/// Accumulation runs in f64: summing in f32 loses the gap between
/// near-parallel vectors, which can rank an exact match behind one of
/// its neighbors.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => cosine_distance(a, b),
        DistanceMetric::Euclidean => euclidean_distance(a, b),
        DistanceMetric::InnerProduct => -(dot(a, b) as f32),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

fn norm(v: &[f32]) -> f64 {
    dot(v, v).sqrt()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        // A zero vector has no direction; treat it as orthogonal.
        return 1.0;
    }
    let similarity = (dot(a, b) / denom).clamp(-1.0, 1.0);
    (1.0 - similarity) as f32
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}

// =============================================================================
// IVF Lists
// =============================================================================

/// Picks up to `lists` centroids by seeded sampling of the stored
/// vectors, matching how IVF indexes train from the data distribution.
pub fn pick_centroids(vectors: &[Vec<f32>], lists: usize) -> Vec<Vec<f32>> {
    if vectors.is_empty() || lists == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(CENTROID_SEED);
    let mut indices: Vec<usize> = (0..vectors.len()).collect();
    indices.shuffle(&mut rng);
    indices.truncate(lists.min(vectors.len()));
    indices.sort_unstable();
    indices.into_iter().map(|i| vectors[i].clone()).collect()
}

/// Index of the nearest centroid under the metric.
pub fn assign_list(metric: DistanceMetric, centroids: &[Vec<f32>], vector: &[f32]) -> Option<usize> {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, distance(metric, c, vector)))
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}

/// The `nprobe` list indices nearest to the query.
pub fn probe_lists(
    metric: DistanceMetric,
    centroids: &[Vec<f32>],
    query: &[f32],
    nprobe: usize,
) -> Vec<usize> {
    let mut ranked: Vec<(usize, f32)> = centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, distance(metric, c, query)))
        .collect();
    ranked.sort_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(nprobe);
    ranked.into_iter().map(|(i, _)| i).collect()
}

// =============================================================================
// Blob Encoding
// =============================================================================

/// Little-endian f32 packing for SQLite BLOB storage.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Inverse of `encode_vector`. Returns None when the blob length is not
/// a multiple of four.
pub fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance_range() {
        let a = vec![1.0, 0.0];
        assert!(distance(DistanceMetric::Cosine, &a, &[1.0, 0.0]).abs() < 1e-6);
        assert!((distance(DistanceMetric::Cosine, &a, &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((distance(DistanceMetric::Cosine, &a, &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_exact_match_ranks_ahead_of_near_parallel_rows() {
        // Vectors [i, 1, 0, 0] all point nearly the same way for large
        // i; f32 accumulation used to collapse their distances and rank
        // a neighbor ahead of the row identical to the query.
        let rows: Vec<Vec<f32>> = (0..200).map(|i| vec![i as f32, 1.0, 0.0, 0.0]).collect();
        let query = rows[199].clone();

        let exact = distance(DistanceMetric::Cosine, &query, &rows[199]);
        assert!(exact.abs() < 1e-9);
        for row in rows.iter().take(199) {
            assert!(distance(DistanceMetric::Cosine, &query, row) > exact);
        }
    }

    #[test]
    fn test_cosine_zero_vector_is_maximally_distant_from_direction() {
        let zero = vec![0.0, 0.0];
        assert_eq!(distance(DistanceMetric::Cosine, &zero, &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let d = distance(DistanceMetric::Euclidean, &[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_inner_product_is_negated_dot() {
        let d = distance(DistanceMetric::InnerProduct, &[1.0, 2.0], &[3.0, 4.0]);
        assert!((d + 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_selection_is_deterministic() {
        let vectors: Vec<Vec<f32>> = (0..50).map(|i| vec![i as f32, (50 - i) as f32]).collect();
        let a = pick_centroids(&vectors, 8);
        let b = pick_centroids(&vectors, 8);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn test_centroid_count_is_capped_by_row_count() {
        let vectors: Vec<Vec<f32>> = (0..3).map(|i| vec![i as f32]).collect();
        assert_eq!(pick_centroids(&vectors, 100).len(), 3);
        assert!(pick_centroids(&[], 100).is_empty());
    }

    #[test]
    fn test_assign_list_picks_nearest_centroid() {
        let centroids = vec![vec![0.0, 0.0], vec![10.0, 10.0]];
        assert_eq!(
            assign_list(DistanceMetric::Euclidean, &centroids, &[1.0, 1.0]),
            Some(0)
        );
        assert_eq!(
            assign_list(DistanceMetric::Euclidean, &centroids, &[9.0, 9.0]),
            Some(1)
        );
        assert_eq!(assign_list(DistanceMetric::Euclidean, &[], &[1.0]), None);
    }

    #[test]
    fn test_probe_lists_orders_by_distance() {
        let centroids = vec![vec![0.0], vec![5.0], vec![10.0]];
        let probed = probe_lists(DistanceMetric::Euclidean, &centroids, &[6.0], 2);
        assert_eq!(probed, vec![1, 2]);
    }

    #[test]
    fn test_blob_round_trip() {
        let vector = vec![0.25, -1.5, 3.75];
        let decoded = decode_vector(&encode_vector(&vector)).unwrap();
        assert_eq!(decoded, vector);
        assert!(decode_vector(&[1, 2, 3]).is_none());
    }
}
