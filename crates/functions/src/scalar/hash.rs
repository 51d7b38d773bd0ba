use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use skiffql_common::Result;
use skiffql_core::Value;

fn digest_input(v: &Value) -> Result<Vec<u8>> {
    v.to_bytes()
}

pub fn md5(args: &[Value]) -> Result<Value> {
    let mut hasher = Md5::new();
    hasher.update(digest_input(&args[0])?);
    Ok(Value::Bytes(hasher.finalize().to_vec()))
}

pub fn sha1(args: &[Value]) -> Result<Value> {
    let mut hasher = Sha1::new();
    hasher.update(digest_input(&args[0])?);
    Ok(Value::Bytes(hasher.finalize().to_vec()))
}

pub fn sha256(args: &[Value]) -> Result<Value> {
    let mut hasher = Sha256::new();
    hasher.update(digest_input(&args[0])?);
    Ok(Value::Bytes(hasher.finalize().to_vec()))
}

pub fn sha512(args: &[Value]) -> Result<Value> {
    let mut hasher = Sha512::new();
    hasher.update(digest_input(&args[0])?);
    Ok(Value::Bytes(hasher.finalize().to_vec()))
}

/// Signed 64-bit FarmHash fingerprint.
pub fn farm_fingerprint(args: &[Value]) -> Result<Value> {
    let bytes = digest_input(&args[0])?;
    Ok(Value::Int64(farmhash::fingerprint64(&bytes) as i64))
}

/// Lowercase RFC 4122 version-4 UUID.
pub fn generate_uuid(_args: &[Value]) -> Result<Value> {
    Ok(Value::String(uuid::Uuid::new_v4().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_return_bytes_of_expected_width() {
        let input = [Value::from("skiff")];
        assert_eq!(md5(&input).unwrap().to_bytes().unwrap().len(), 16);
        assert_eq!(sha1(&input).unwrap().to_bytes().unwrap().len(), 20);
        assert_eq!(sha256(&input).unwrap().to_bytes().unwrap().len(), 32);
        assert_eq!(sha512(&input).unwrap().to_bytes().unwrap().len(), 64);
    }

    #[test]
    fn fingerprint_is_stable_and_signed() {
        let a = farm_fingerprint(&[Value::from("x")]).unwrap();
        let b = farm_fingerprint(&[Value::from("x")]).unwrap();
        assert_eq!(a, b);
        assert!(matches!(a, Value::Int64(_)));
    }

    #[test]
    fn uuid_is_lowercase_v4() {
        let Value::String(s) = generate_uuid(&[]).unwrap() else {
            panic!("expected string")
        };
        assert_eq!(s.len(), 36);
        assert_eq!(s, s.to_lowercase());
        assert_eq!(s.as_bytes()[14], b'4');
    }
}
