use crate::protocol::mysql::constants::SCRAMBLE_SIZE;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha1::{Digest, Sha1};

/// The user/password pair clients must present. An empty password expects
/// an empty auth response.
#[derive(Debug, Clone)]
pub struct AuthCredentials {
    pub user: String,
    pub password: String,
}

/// Generate a random scramble from printable-ish ASCII, avoiding NUL and
/// the `$` separator the way the server's crypt_genhash does.
#[inline]
pub fn gen_user_salt() -> [u8; SCRAMBLE_SIZE] {
    let mut salt: [u8; SCRAMBLE_SIZE] = [0; SCRAMBLE_SIZE];
    let mut r = StdRng::from_entropy();
    for salt_item in salt.iter_mut() {
        let salt_rand = r.gen_range(0..127) as u8;
        *salt_item = salt_rand;
        if *salt_item == b'\0' || *salt_item == b'$' {
            *salt_item += 1;
        }
    }
    salt
}

fn sha1_1(bytes: impl AsRef<[u8]>) -> [u8; 20] {
    Sha1::digest(bytes).into()
}

fn sha1_2(bytes1: impl AsRef<[u8]>, bytes2: impl AsRef<[u8]>) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(bytes1.as_ref());
    hasher.update(bytes2.as_ref());
    hasher.finalize().into()
}

fn xor<T, U>(mut left: T, right: U) -> T
where
    T: AsMut<[u8]>,
    U: AsRef<[u8]>,
{
    left.as_mut()
        .iter_mut()
        .zip(right.as_ref().iter())
        .for_each(|(l, r)| *l ^= r);
    left
}

/// The token a `mysql_native_password` client sends:
/// `SHA1(password) XOR SHA1(scramble ++ SHA1(SHA1(password)))`
pub fn scramble_native_password(scramble: &[u8], password: &str) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = sha1_1(password.as_bytes());
    let stage2 = sha1_1(stage1);
    let rhs = sha1_2(scramble, stage2);
    xor(stage1, rhs).to_vec()
}

pub fn verify_native_password(scramble: &[u8], password: &str, client_token: &[u8]) -> bool {
    let expected = scramble_native_password(scramble, password);
    if expected.len() != client_token.len() {
        return false;
    }
    expected
        .iter()
        .zip(client_token.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scramble_round_trip() {
        let salt = gen_user_salt();
        let token = scramble_native_password(&salt, "secret");
        assert_eq!(token.len(), 20);
        assert!(verify_native_password(&salt, "secret", &token));
        assert!(!verify_native_password(&salt, "other", &token));
        assert!(!verify_native_password(&salt, "secret", b""));
    }

    #[test]
    fn test_empty_password() {
        let salt = gen_user_salt();
        assert!(verify_native_password(&salt, "", b""));
        assert!(!verify_native_password(&salt, "", b"junk"));
    }

    #[test]
    fn test_salt_has_no_forbidden_bytes() {
        for _ in 0..32 {
            let salt = gen_user_salt();
            assert!(!salt.contains(&b'\0'));
            assert!(!salt.contains(&b'$'));
        }
    }
}
