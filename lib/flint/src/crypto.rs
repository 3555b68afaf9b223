use ctor::ctor;
use libsodium_sys;

pub const MAC_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_ABYTES as usize;
pub const KEY_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_KEYBYTES as usize;
pub const NONCE_SIZE: usize = libsodium_sys::crypto_aead_chacha20poly1305_IETF_NPUBBYTES as usize;

/// Initialize the sodium infrastructure
#[ctor]
fn INIT_SODIUM() {
    unsafe {
        if libsodium_sys::sodium_init() < 0 {
            panic!("Cryptography initialization failed")
        }
    }
}

/// Encrypts the plain text under the given nonce and key, returning the cipher
/// text with the MAC appended. The additional data participates in the MAC but
/// is not part of the output.
pub fn seal(
    plain: &[u8],
    additional_data: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &[u8; KEY_SIZE],
) -> Vec<u8> {
    let mut cipher = vec![0u8; plain.len() + MAC_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_aead_chacha20poly1305_ietf_encrypt(
            cipher.as_mut_ptr(),
            ::std::ptr::null_mut(),
            plain.as_ptr(),
            plain.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            ::std::ptr::null(),
            nonce.as_ptr(),
            key.as_ptr(),
        )
    };

    if result < 0 {
        panic!("Encryption failed")
    }

    cipher
}

/// Decrypts a cipher text produced by `seal`. Returns `None` when the MAC does
/// not verify or the cipher text is shorter than a MAC.
pub fn open(
    cipher: &[u8],
    additional_data: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &[u8; KEY_SIZE],
) -> Option<Vec<u8>> {
    if cipher.len() < MAC_SIZE {
        return None;
    }

    let mut plain = vec![0u8; cipher.len() - MAC_SIZE];

    let result = unsafe {
        libsodium_sys::crypto_aead_chacha20poly1305_ietf_decrypt(
            plain.as_mut_ptr(),
            ::std::ptr::null_mut(),
            ::std::ptr::null_mut(),
            cipher.as_ptr(),
            cipher.len() as u64,
            additional_data.as_ptr(),
            additional_data.len() as u64,
            nonce.as_ptr(),
            key.as_ptr(),
        )
    };

    if result < 0 {
        return None;
    }

    Some(plain)
}

/// Fills the provided buffer with cryptographically secure random bytes
#[inline]
pub fn random_bytes(out: &mut [u8]) {
    unsafe {
        libsodium_sys::randombytes_buf(out.as_mut_ptr() as *mut ::std::ffi::c_void, out.len());
    }
}
