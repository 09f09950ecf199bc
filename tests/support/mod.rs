use medley_rs::{EntityId, InputRecord, RecordView};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[allow(dead_code)]
pub fn person(id: u64, fname: &str, lname: &str, city: &str, postal: &str) -> InputRecord {
    let view = RecordView::new()
        .with("fname", fname)
        .with("lname", lname)
        .with("city", city)
        .with("postal", postal);
    InputRecord::new(EntityId::new(id), view)
}

#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct GeneratedDataset {
    pub records: Vec<InputRecord>,
    /// Ids expected to land in the same cluster, grouped.
    pub duplicate_groups: Vec<Vec<u64>>,
}

/// Generate a person population with seeded duplicates.
///
/// Each base record gets unique field values; with `duplicate_probability`
/// the next id re-emits the previous base with a one-character deletion
/// typo in the first name, so a `fname%1` directive can recover the pair.
#[allow(dead_code)]
pub fn generate_people(count: u64, duplicate_probability: f64, seed: u64) -> GeneratedDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let cities = ["Springfield", "Riverton", "Lakewood", "Fairview", "Ashland"];

    let mut records = Vec::with_capacity(count as usize);
    let mut duplicate_groups: Vec<Vec<u64>> = Vec::new();
    let mut id = 1u64;

    while id <= count {
        let fname = format!("Person{:05}", id);
        let lname = format!("Family{:05}", rng.random_range(0..count * 2));
        let city = cities[rng.random_range(0..cities.len())];
        let postal = format!("{:05}", rng.random_range(10_000..99_999));
        records.push(person(id, &fname, &lname, city, &postal));

        if id < count && rng.random_bool(duplicate_probability) {
            let duplicate_id = id + 1;
            let typo = delete_one_char(&fname, rng.random_range(0..fname.chars().count()));
            records.push(person(duplicate_id, &typo, &lname, city, &postal));
            duplicate_groups.push(vec![id, duplicate_id]);
            id += 2;
        } else {
            id += 1;
        }
    }

    GeneratedDataset {
        records,
        duplicate_groups,
    }
}

#[allow(dead_code)]
fn delete_one_char(value: &str, index: usize) -> String {
    value
        .chars()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, c)| c)
        .collect()
}
