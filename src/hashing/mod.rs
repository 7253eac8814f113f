use blake3::Hasher;

/// Computes a 64-bit hash of the input data using BLAKE3, truncated from 256 bits.
///
/// Used for feature hashing in the built-in embedder. Collisions only merge two
/// features into one bucket, which raises a similarity score slightly; they never
/// corrupt stored data.
#[inline]
pub fn hash_to_u64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let bytes: [u8; 8] = hash.as_bytes()[0..8]
        .try_into()
        .expect("BLAKE3 always produces at least 8 bytes");
    u64::from_le_bytes(bytes)
}

/// Maps a text feature to a bucket in `0..dim`.
#[inline]
pub fn feature_bucket(feature: &str, dim: usize) -> usize {
    debug_assert!(dim > 0);
    (hash_to_u64(feature.as_bytes()) % dim as u64) as usize
}

/// Cache key for a query embedding: the provider name is part of the key so two
/// providers never share vectors.
#[inline]
pub fn hash_query(provider: &str, text: &str) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(provider.as_bytes());
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    *hasher.finalize().as_bytes()
}
