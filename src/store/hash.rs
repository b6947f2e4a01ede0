use sha2::{Digest, Sha256};

pub fn compute_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let digest = compute_hash("tryon:0:selfie.jpg:1024");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, compute_hash("tryon:0:selfie.jpg:1024"));
        assert_ne!(digest, compute_hash("tryon:1:selfie.jpg:1024"));
    }
}
