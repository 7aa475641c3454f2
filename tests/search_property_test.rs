use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use popcorn_core::{dot_product, l2_normalized, FlatIndex, MetadataStore, Metric};
use popcorn_vector::search::{SearchError, SearchHandler, MAX_TOP_K};

const DIM: usize = 8;
const ROUNDS: usize = 200;

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    (0..DIM).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn random_handler(rng: &mut StdRng, rows: usize) -> (SearchHandler, Vec<Vec<f32>>) {
    let mut index = FlatIndex::new(DIM, Metric::InnerProduct);
    let mut stored = Vec::with_capacity(rows);
    let mut items = Vec::with_capacity(rows);
    while stored.len() < rows {
        let Some(unit) = l2_normalized(&random_vector(rng)) else {
            continue;
        };
        index.add(&unit).unwrap();
        items.push(json!({"imdbId": format!("tt{}", stored.len())}));
        stored.push(unit);
    }
    (
        SearchHandler::new(Box::new(index), MetadataStore::new(DIM, items)),
        stored,
    )
}

#[test]
fn prop_result_count_and_finite_scores() {
    let mut rng = StdRng::seed_from_u64(0x5EED_F00D);

    for _ in 0..ROUNDS {
        let rows = rng.gen_range(0..40);
        let (handler, _) = random_handler(&mut rng, rows);
        let top_k = rng.gen_range(1..=MAX_TOP_K);
        let query = random_vector(&mut rng);

        let hits = match handler.search(&query, top_k as i64) {
            Ok(hits) => hits,
            Err(SearchError::ZeroNorm) => continue,
            Err(e) => panic!("unexpected error: {e}"),
        };

        assert!(hits.len() <= top_k.min(rows));
        assert_eq!(hits.len(), top_k.min(rows), "every row is a real row");
        for hit in &hits {
            assert!(hit.score.is_finite());
            assert_eq!(hit.score, hit.similarity);
            assert!(hit.score <= 1.0 + 1e-5 && hit.score >= -1.0 - 1e-5);
        }
    }
}

#[test]
fn prop_hits_are_sorted_and_match_brute_force() {
    let mut rng = StdRng::seed_from_u64(0xC1_4E_3A);

    for _ in 0..ROUNDS {
        let rows = rng.gen_range(1..60);
        let (handler, stored) = random_handler(&mut rng, rows);
        let top_k = rng.gen_range(1..=10usize);
        let query = random_vector(&mut rng);
        let Some(unit) = l2_normalized(&query) else {
            continue;
        };

        let hits = handler.search(&query, top_k as i64).unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }

        let best = stored
            .iter()
            .map(|v| dot_product(&unit, v))
            .fold(f32::MIN, f32::max);
        assert!((hits[0].score - best as f64).abs() < 1e-5);
    }
}

#[test]
fn prop_zero_vector_always_rejected() {
    let mut rng = StdRng::seed_from_u64(42);
    let (handler, _) = random_handler(&mut rng, 5);

    for top_k in 1..=MAX_TOP_K as i64 {
        assert_eq!(
            handler.search(&[0.0; DIM], top_k),
            Err(SearchError::ZeroNorm)
        );
    }
}

#[test]
fn prop_wrong_length_names_dim() {
    let mut rng = StdRng::seed_from_u64(7);
    let (handler, _) = random_handler(&mut rng, 3);

    for len in (0..32).filter(|&l| l != DIM) {
        let err = handler.search(&vec![1.0; len], 5).unwrap_err();
        assert_eq!(err.to_string(), format!("vector must have length {DIM}"));
    }
}
