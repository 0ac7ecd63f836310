//! Thread-local storage template.
//!
//! The template is the link-time image of all thread-local variables: an
//! initialized part (`.tdata`) followed by a zero-filled part (`.tbss`).
//! Every new thread gets a private copy carved out of its stack region. The
//! initial context on each core uses the statically reserved main block.

use core::ptr;

/// Layout and initial contents of a thread-local storage block.
#[derive(Debug, Clone, Copy)]
pub struct TlsTemplate {
    image: *const u8,
    image_len: usize,
    zero_fill: usize,
    align: usize,
    main_block: *mut u8,
}

// Safety: the template only refers to immutable link-time data and to the
// main block, which is only touched by the core's initial context.
unsafe impl Send for TlsTemplate {}
unsafe impl Sync for TlsTemplate {}

impl TlsTemplate {
    /// A template with no thread-local variables.
    pub const fn empty() -> Self {
        Self {
            image: ptr::null(),
            image_len: 0,
            zero_fill: 0,
            align: 1,
            main_block: ptr::null_mut(),
        }
    }

    /// Create a template from an initialized image followed by `zero_fill`
    /// zero bytes. `align` must be a power of two.
    pub const fn new(image: &'static [u8], zero_fill: usize, align: usize) -> Self {
        assert!(align.is_power_of_two());
        Self {
            image: image.as_ptr(),
            image_len: image.len(),
            zero_fill,
            align,
            main_block: ptr::null_mut(),
        }
    }

    /// Use `block` as the TLS block of the core's initial context.
    ///
    /// # Safety
    ///
    /// `block` must be valid for `block_size()` bytes for the lifetime of
    /// the program, aligned to `align()`, and already initialized from the
    /// template. It is never freed.
    pub const unsafe fn with_main_block(mut self, block: *mut u8) -> Self {
        self.main_block = block;
        self
    }

    /// Build the template from the symbols the linker script defines.
    #[cfg(feature = "linker-tls")]
    pub fn from_linker() -> Self {
        extern "C" {
            static __tdata_start: u8;
            static __tdata_size: u8;
            static __tbss_size: u8;
            static __tls_start: u8;
        }

        // Safety: only the addresses of the linker symbols are taken
        unsafe {
            Self {
                image: ptr::addr_of!(__tdata_start),
                image_len: ptr::addr_of!(__tdata_size) as usize,
                zero_fill: ptr::addr_of!(__tbss_size) as usize,
                align: 8,
                main_block: ptr::addr_of!(__tls_start) as *mut u8,
            }
        }
    }

    /// Size of one TLS block in bytes.
    pub const fn block_size(&self) -> usize {
        self.image_len + self.zero_fill
    }

    /// Required alignment of a TLS block.
    pub const fn align(&self) -> usize {
        self.align
    }

    /// TLS block of the initial context, or null if none was configured.
    pub const fn main_block(&self) -> *mut u8 {
        self.main_block
    }

    /// Copy the template into `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `block_size()` bytes.
    pub(crate) unsafe fn instantiate(&self, dst: *mut u8) {
        unsafe {
            if self.image_len > 0 {
                ptr::copy_nonoverlapping(self.image, dst, self.image_len);
            }
            ptr::write_bytes(dst.add(self.image_len), 0, self.zero_fill);
        }
    }
}

impl Default for TlsTemplate {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static IMAGE: [u8; 3] = [0xAA, 0xBB, 0xCC];

    #[test]
    fn test_empty_template() {
        let tls = TlsTemplate::empty();
        assert_eq!(tls.block_size(), 0);
        assert!(tls.main_block().is_null());
    }

    #[test]
    fn test_instantiate_copies_and_zeroes() {
        let tls = TlsTemplate::new(&IMAGE, 5, 4);
        assert_eq!(tls.block_size(), 8);

        let mut block = [0xFFu8; 8];
        unsafe { tls.instantiate(block.as_mut_ptr()) };
        assert_eq!(block, [0xAA, 0xBB, 0xCC, 0, 0, 0, 0, 0]);
    }
}
