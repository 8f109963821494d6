//! Hash and equality functions for use with [`HashTable`](crate::containers::HashTable).
//!
//! Every function has the shape `fn(&K) -> u32` (or `fn(&K, &K) -> bool` for equality) so it
//! can be passed to the hash table directly. The `hash_combine_*` variants take a previous
//! hash as their seed, which allows hashing compound keys field by field. Hashing a value
//! with [`DEFAULT_HASH_SEED`] as the seed gives the same result as the non-combine version.
//!
//! All hashes are based on MurmurHash3 and are deterministic across runs and platforms:
//! multi-byte blocks are always read as little-endian.

/// Seed used by the non-combine hash functions.
pub const DEFAULT_HASH_SEED: u32 = 0xc70f_6907;

const C1_32: u32 = 0xcc9e_2d51;
const C2_32: u32 = 0x1b87_3593;

const C1_64: u64 = 0x87c3_7b91_1142_53d5;
const C2_64: u64 = 0x4cf5_ad43_2745_937f;

#[inline(always)]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[inline(always)]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[inline(always)]
fn mix_k1(k1: u32) -> u32 {
    k1.wrapping_mul(C1_32).rotate_left(15).wrapping_mul(C2_32)
}

#[inline(always)]
fn mix_block(h1: u32, block: u32) -> u32 {
    (h1 ^ mix_k1(block))
        .rotate_left(13)
        .wrapping_mul(5)
        .wrapping_add(0xe654_6b64)
}

/// Hashes fewer than four bytes: only the tail step of the full algorithm.
#[inline]
fn hash_bytes_small(seed: u32, bytes: &[u8]) -> u32 {
    debug_assert!(bytes.len() < 4);
    let mut h1 = seed;
    if !bytes.is_empty() {
        let k1 = bytes
            .iter()
            .rev()
            .fold(0_u32, |k1, &byte| (k1 << 8) | u32::from(byte));
        h1 ^= mix_k1(k1);
    }
    fmix32(h1 ^ bytes.len() as u32)
}

/// Hashes a 4-byte value: a single block of the full algorithm.
#[inline]
fn hash_bytes32(seed: u32, value: u32) -> u32 {
    fmix32(mix_block(seed, value) ^ 4)
}

/// Hashes an 8-byte value: two blocks of the full algorithm, low word first.
#[inline]
fn hash_bytes64(seed: u32, value: u64) -> u32 {
    let h1 = mix_block(seed, value as u32);
    fmix32(mix_block(h1, (value >> 32) as u32) ^ 8)
}

/// Hashes `bytes` with [`DEFAULT_HASH_SEED`].
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    hash_combine_bytes(DEFAULT_HASH_SEED, bytes)
}

/// Hashes `bytes`, combining with the previous hash `seed` (MurmurHash3 x86_32).
pub fn hash_combine_bytes(seed: u32, bytes: &[u8]) -> u32 {
    let mut blocks = bytes.chunks_exact(4);
    let mut h1 = seed;
    for block in blocks.by_ref() {
        let mut word = [0_u8; 4];
        word.copy_from_slice(block);
        h1 = mix_block(h1, u32::from_le_bytes(word));
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k1 = tail
            .iter()
            .rev()
            .fold(0_u32, |k1, &byte| (k1 << 8) | u32::from(byte));
        h1 ^= mix_k1(k1);
    }

    // Only the low 32 bits of the length take part, same as the reference algorithm.
    fmix32(h1 ^ bytes.len() as u32)
}

/// Computes a 128-bit hash of `bytes` seeded with a previous 128-bit hash
/// (MurmurHash3 x64_128).
///
/// This is meant for things like content hashes where 32 bits aren't enough to avoid
/// collisions. Pass `[0, 0]` as the seed for a fresh hash.
pub fn hash_combine_bytes128(seed: [u64; 2], bytes: &[u8]) -> [u64; 2] {
    let [mut h1, mut h2] = seed;

    let mut blocks = bytes.chunks_exact(16);
    for block in blocks.by_ref() {
        let (lo, hi) = block.split_at(8);
        let mut k1 = read_u64_le(lo);
        let mut k2 = read_u64_le(hi);

        k1 = k1.wrapping_mul(C1_64).rotate_left(31).wrapping_mul(C2_64);
        h1 ^= k1;
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2_64).rotate_left(33).wrapping_mul(C1_64);
        h2 ^= k2;
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = blocks.remainder();
    if tail.len() > 8 {
        let k2 = read_u64_le(&tail[8..]);
        h2 ^= k2.wrapping_mul(C2_64).rotate_left(33).wrapping_mul(C1_64);
    }
    if !tail.is_empty() {
        let k1 = read_u64_le(&tail[..tail.len().min(8)]);
        h1 ^= k1.wrapping_mul(C1_64).rotate_left(31).wrapping_mul(C2_64);
    }

    let len = bytes.len() as u64;
    h1 ^= len;
    h2 ^= len;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    [h1, h2]
}

/// Reads up to eight bytes as a little-endian integer, zero-extending short input.
#[inline(always)]
fn read_u64_le(bytes: &[u8]) -> u64 {
    debug_assert!(bytes.len() <= 8);
    let mut word = [0_u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(word)
}

/// Combines two hash values.
///
/// Unlike XOR or addition the result depends on the order of the arguments, so chaining
/// it over the fields of a key gives different hashes for permuted fields.
#[inline]
pub fn hash_combine(first: u32, second: u32) -> u32 {
    first
        ^ second
            .wrapping_add(0x9e37_79b9)
            .wrapping_add(first << 6)
            .wrapping_add(first >> 2)
}

/// Returns a pre-computed hash value unchanged.
#[inline]
pub fn hash_identity(value: &u32) -> u32 {
    *value
}

pub fn hash_str(value: &str) -> u32 {
    hash_bytes(value.as_bytes())
}

pub fn hash_combine_str(seed: u32, value: &str) -> u32 {
    hash_combine_bytes(seed, value.as_bytes())
}

pub fn str_equal(first: &str, second: &str) -> bool {
    first == second
}

macro_rules! int_hashes {
    ($($ty:ty => $hash:ident, $combine:ident, $equal:ident, $body:expr;)*) => {$(
        #[doc = concat!("Hashes a `", stringify!($ty), "`.")]
        #[inline]
        pub fn $hash(value: &$ty) -> u32 {
            $combine(DEFAULT_HASH_SEED, value)
        }

        #[doc = concat!("Hashes a `", stringify!($ty), "`, combining with the previous hash `seed`.")]
        #[inline]
        pub fn $combine(seed: u32, value: &$ty) -> u32 {
            let body: fn(u32, $ty) -> u32 = $body;
            body(seed, *value)
        }

        #[inline]
        pub fn $equal(first: &$ty, second: &$ty) -> bool {
            first == second
        }
    )*};
}

int_hashes! {
    u8 => hash_u8, hash_combine_u8, u8_equal, |seed, v| hash_bytes_small(seed, &[v]);
    u16 => hash_u16, hash_combine_u16, u16_equal, |seed, v| hash_bytes_small(seed, &v.to_le_bytes());
    u32 => hash_u32, hash_combine_u32, u32_equal, hash_bytes32;
    u64 => hash_u64, hash_combine_u64, u64_equal, hash_bytes64;
    usize => hash_usize, hash_combine_usize, usize_equal, |seed, v| hash_bytes64(seed, v as u64);
}

/// Hashes a pointer by its address.
#[inline]
pub fn hash_pointer<T: ?Sized>(ptr: &*const T) -> u32 {
    hash_combine_pointer(DEFAULT_HASH_SEED, ptr)
}

#[inline]
pub fn hash_combine_pointer<T: ?Sized>(seed: u32, ptr: &*const T) -> u32 {
    hash_bytes64(seed, ptr.cast::<()>() as usize as u64)
}

/// Compares pointers by address, ignoring any metadata of wide pointers.
#[inline]
pub fn pointer_equal<T: ?Sized>(first: &*const T, second: &*const T) -> bool {
    first.cast::<()>() == second.cast::<()>()
}

/// Hashes an `f32`. `-0.0` and `0.0` hash the same since they compare equal.
#[inline]
pub fn hash_f32(value: &f32) -> u32 {
    hash_combine_f32(DEFAULT_HASH_SEED, value)
}

#[inline]
pub fn hash_combine_f32(seed: u32, value: &f32) -> u32 {
    let value = if *value == 0.0 { 0.0_f32 } else { *value };
    hash_bytes32(seed, value.to_bits())
}

#[inline]
pub fn f32_equal(first: &f32, second: &f32) -> bool {
    first == second
}

/// Hashes an `f64`. `-0.0` and `0.0` hash the same since they compare equal.
#[inline]
pub fn hash_f64(value: &f64) -> u32 {
    hash_combine_f64(DEFAULT_HASH_SEED, value)
}

#[inline]
pub fn hash_combine_f64(seed: u32, value: &f64) -> u32 {
    let value = if *value == 0.0 { 0.0_f64 } else { *value };
    hash_bytes64(seed, value.to_bits())
}

#[inline]
pub fn f64_equal(first: &f64, second: &f64) -> bool {
    first == second
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_32_1() {
        assert_eq!(hash_combine_bytes(0, b""), 0);
        assert_eq!(hash_combine_bytes(1, b""), 0x514e_28b7);
        assert_eq!(hash_combine_bytes(0, b"hello"), 0x248b_fa47);
        assert_eq!(
            hash_combine_bytes(0, b"The quick brown fox jumps over the lazy dog"),
            0x2e4f_f723
        );
        assert_eq!(hash_bytes(b"abc"), 0x41cd_694a);
    }

    #[test]
    fn test_murmur3_128_1() {
        assert_eq!(
            hash_combine_bytes128([0, 0], b"hello"),
            [0xcbd8_a7b3_41bd_9b02, 0x5b1e_906a_48ae_1d19]
        );
        assert_eq!(
            hash_combine_bytes128([0, 0], b"The quick brown fox jumps over the lazy dog"),
            [0xe34b_bc7b_bc07_1b6c, 0x7a43_3ca9_c49a_9347]
        );
        assert_ne!(
            hash_combine_bytes128([1, 0], b"hello"),
            hash_combine_bytes128([0, 0], b"hello")
        );
    }

    #[test]
    fn test_fixed_width_1() {
        // The specialized paths must agree with hashing the value's bytes.
        for v in [0_u8, 1, 0x7f, 0xff] {
            assert_eq!(hash_u8(&v), hash_bytes(&[v]));
        }
        for v in [0_u16, 1, 0x1234, u16::MAX] {
            assert_eq!(hash_u16(&v), hash_bytes(&v.to_le_bytes()));
        }
        for v in [0_u32, 1, 0xdead_beef, u32::MAX] {
            assert_eq!(hash_u32(&v), hash_bytes(&v.to_le_bytes()));
            assert_eq!(hash_combine_u32(17, &v), hash_combine_bytes(17, &v.to_le_bytes()));
        }
        for v in [0_u64, 1, 0x0123_4567_89ab_cdef, u64::MAX] {
            assert_eq!(hash_u64(&v), hash_bytes(&v.to_le_bytes()));
            assert_eq!(hash_usize(&(v as usize)), hash_u64(&(v as usize as u64)));
        }
    }

    #[test]
    fn test_str_1() {
        assert_eq!(hash_str("abc"), hash_bytes(b"abc"));
        assert_eq!(hash_str("abc"), hash_combine_str(DEFAULT_HASH_SEED, "abc"));
        assert_ne!(hash_str("abc"), hash_str("abd"));
        assert!(str_equal("abc", "abc"));
        assert!(!str_equal("abc", "ab"));
    }

    #[test]
    fn test_float_1() {
        assert_eq!(hash_f32(&0.0), hash_f32(&-0.0));
        assert_eq!(hash_f64(&0.0), hash_f64(&-0.0));
        assert_eq!(hash_f32(&1.5), hash_u32(&1.5_f32.to_bits()));
        assert_eq!(hash_f64(&1.5), hash_u64(&1.5_f64.to_bits()));
        assert!(f32_equal(&0.0, &-0.0));
        assert!(!f64_equal(&f64::NAN, &f64::NAN));
    }

    #[test]
    fn test_pointer_1() {
        let values = [1_u32, 2];
        let a: *const u32 = &values[0];
        let b: *const u32 = &values[1];
        assert_eq!(hash_pointer(&a), hash_usize(&(a as usize)));
        assert_ne!(hash_pointer(&a), hash_pointer(&b));
        assert!(pointer_equal(&a, &a));
        assert!(!pointer_equal(&a, &b));

        let s: *const str = "xyz";
        assert_eq!(hash_pointer(&s), hash_usize(&(s.cast::<u8>() as usize)));
    }

    #[test]
    fn test_combine_1() {
        let a = hash_str("a");
        let b = hash_str("b");
        assert_ne!(hash_combine(a, b), hash_combine(b, a));
        assert_eq!(hash_identity(&a), a);
        assert_eq!(hash_combine(0, 0), 0x9e37_79b9);
    }
}
