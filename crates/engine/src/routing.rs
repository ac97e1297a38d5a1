//! Multi-writer routing (§4.8): `partition = blake2b_8(subset_uuid) %
//! n_writers`, so every record for one subset lands on the same writer
//! and seals never race across processes.

pub use rowvault_identity::writer_partition;

/// True if `subset_uuid` is this writer's responsibility among
/// `n_writers` cooperating processes.
pub fn owns_subset(subset_uuid: &str, writer_index: u32, n_writers: u32) -> bool {
    writer_partition(subset_uuid, n_writers) == writer_index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_writer_owns_a_given_subset() {
        let n = 6;
        let owners: Vec<u32> = (0..n)
            .filter(|&w| owns_subset("subset-z", w, n))
            .collect();
        assert_eq!(owners.len(), 1);
    }
}
