//! The Shannon stream cipher with its integrated MAC.
//!
//! Bit-for-bit port of the reference algorithm (Rose, Hawkes, Paddon and
//! de Vries). Words are little-endian. Byte counts that are not a multiple
//! of four are buffered, so encrypting a frame in several calls yields the
//! same keystream and tag as a single call over the whole frame.
//!
//! [`StreamCipher`] wraps one [`Shannon`] instance per direction together
//! with the frame counter used as its nonce.

const N: usize = 16;
const FOLD: usize = N;
const INITKONST: u32 = 0x6996_c53a;
const KEYP: usize = 13;

/// Size of the authentication tag appended to every frame.
pub const TAG_SIZE: usize = 4;

#[inline]
fn sbox1(mut w: u32) -> u32 {
    w ^= w.rotate_left(5) | w.rotate_left(7);
    w ^= w.rotate_left(19) | w.rotate_left(22);
    w
}

#[inline]
fn sbox2(mut w: u32) -> u32 {
    w ^= w.rotate_left(7) | w.rotate_left(22);
    w ^= w.rotate_left(5) | w.rotate_left(19);
    w
}

/// Raw Shannon cipher state.
#[derive(Clone)]
pub struct Shannon {
    r: [u32; N],
    crc: [u32; N],
    init_r: [u32; N],
    konst: u32,
    sbuf: u32,
    mbuf: u32,
    nbuf: u32,
}

impl Shannon {
    /// Creates a cipher keyed with `key`.
    pub fn new(key: &[u8]) -> Self {
        let mut state = Self {
            r: [0; N],
            crc: [0; N],
            init_r: [0; N],
            konst: INITKONST,
            sbuf: 0,
            mbuf: 0,
            nbuf: 0,
        };
        state.init_state();
        state.load_key(key);
        state.konst = state.r[0];
        state.init_r = state.r;
        state
    }

    fn init_state(&mut self) {
        self.r[0] = 1;
        self.r[1] = 1;
        for i in 2..N {
            self.r[i] = self.r[i - 1].wrapping_add(self.r[i - 2]);
        }
        self.konst = INITKONST;
    }

    fn cycle(&mut self) {
        let t = self.r[12] ^ self.r[13] ^ self.konst;
        let t = sbox1(t) ^ self.r[0].rotate_left(1);
        self.r.copy_within(1.., 0);
        self.r[N - 1] = t;
        let t = sbox2(self.r[2] ^ self.r[15]);
        self.r[0] ^= t;
        self.sbuf = t ^ self.r[8] ^ self.r[12];
    }

    fn crc_func(&mut self, word: u32) {
        let t = self.crc[0] ^ self.crc[2] ^ self.crc[15] ^ word;
        self.crc.copy_within(1.., 0);
        self.crc[N - 1] = t;
    }

    fn mac_func(&mut self, word: u32) {
        self.crc_func(word);
        self.r[KEYP] ^= word;
    }

    fn diffuse(&mut self) {
        for _ in 0..FOLD {
            self.cycle();
        }
    }

    fn load_key(&mut self, key: &[u8]) {
        let mut chunks = key.chunks_exact(4);
        for chunk in &mut chunks {
            self.r[KEYP] ^= u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.cycle();
        }

        let rest = chunks.remainder();
        if !rest.is_empty() {
            let mut extra = [0u8; 4];
            extra[..rest.len()].copy_from_slice(rest);
            self.r[KEYP] ^= u32::from_le_bytes(extra);
            self.cycle();
        }

        self.r[KEYP] ^= key.len() as u32;
        self.cycle();

        self.crc = self.r;
        self.diffuse();
        for i in 0..N {
            self.r[i] ^= self.crc[i];
        }
    }

    /// Re-initialises the cipher from the keyed state with a new nonce.
    pub fn nonce(&mut self, nonce: &[u8]) {
        self.r = self.init_r;
        self.konst = INITKONST;
        self.load_key(nonce);
        self.konst = self.r[0];
        self.nbuf = 0;
    }

    /// Sets the nonce to the big-endian bytes of `n`.
    pub fn nonce_u32(&mut self, n: u32) {
        self.nonce(&n.to_be_bytes());
    }

    /// Encrypts `buf` in place and folds the plaintext into the MAC.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        let mut pos = 0;

        if self.nbuf != 0 {
            while self.nbuf != 0 && pos < buf.len() {
                self.mbuf ^= (buf[pos] as u32) << (32 - self.nbuf);
                buf[pos] ^= (self.sbuf >> (32 - self.nbuf)) as u8;
                pos += 1;
                self.nbuf -= 8;
            }
            if self.nbuf != 0 {
                return;
            }
            self.mac_func(self.mbuf);
        }

        let whole = (buf.len() - pos) & !0x03;
        for word in buf[pos..pos + whole].chunks_exact_mut(4) {
            self.cycle();
            let t = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            self.mac_func(t);
            word.copy_from_slice(&(t ^ self.sbuf).to_le_bytes());
        }
        pos += whole;

        if pos < buf.len() {
            self.cycle();
            self.mbuf = 0;
            self.nbuf = 32;
            while self.nbuf != 0 && pos < buf.len() {
                self.mbuf ^= (buf[pos] as u32) << (32 - self.nbuf);
                buf[pos] ^= (self.sbuf >> (32 - self.nbuf)) as u8;
                pos += 1;
                self.nbuf -= 8;
            }
        }
    }

    /// Decrypts `buf` in place and folds the recovered plaintext into the MAC.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        let mut pos = 0;

        if self.nbuf != 0 {
            while self.nbuf != 0 && pos < buf.len() {
                buf[pos] ^= (self.sbuf >> (32 - self.nbuf)) as u8;
                self.mbuf ^= (buf[pos] as u32) << (32 - self.nbuf);
                pos += 1;
                self.nbuf -= 8;
            }
            if self.nbuf != 0 {
                return;
            }
            self.mac_func(self.mbuf);
        }

        let whole = (buf.len() - pos) & !0x03;
        for word in buf[pos..pos + whole].chunks_exact_mut(4) {
            self.cycle();
            let t = u32::from_le_bytes([word[0], word[1], word[2], word[3]]) ^ self.sbuf;
            self.mac_func(t);
            word.copy_from_slice(&t.to_le_bytes());
        }
        pos += whole;

        if pos < buf.len() {
            self.cycle();
            self.mbuf = 0;
            self.nbuf = 32;
            while self.nbuf != 0 && pos < buf.len() {
                buf[pos] ^= (self.sbuf >> (32 - self.nbuf)) as u8;
                self.mbuf ^= (buf[pos] as u32) << (32 - self.nbuf);
                pos += 1;
                self.nbuf -= 8;
            }
        }
    }

    /// Completes the MAC and writes `out.len()` tag bytes.
    pub fn finish(&mut self, out: &mut [u8]) {
        if self.nbuf != 0 {
            self.mac_func(self.mbuf);
        }

        self.cycle();
        self.r[KEYP] ^= INITKONST ^ (self.nbuf << 3);
        self.nbuf = 0;

        for i in 0..N {
            self.r[i] ^= self.crc[i];
        }
        self.diffuse();

        for chunk in out.chunks_mut(4) {
            self.cycle();
            let bytes = self.sbuf.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

/// One direction of the encrypted connection.
///
/// Every frame is processed as: [`begin_frame`](Self::begin_frame), then any
/// number of [`encrypt`](Self::encrypt) or [`decrypt`](Self::decrypt) calls,
/// then [`finish`](Self::finish). The nonce counter advances once per frame.
#[derive(Clone)]
pub struct StreamCipher {
    cipher: Shannon,
    nonce: u32,
}

impl StreamCipher {
    /// Creates a cipher for one direction, starting at frame counter 0.
    pub fn new(key: &[u8]) -> Self {
        Self {
            cipher: Shannon::new(key),
            nonce: 0,
        }
    }

    /// Re-nonces the cipher with the current counter and advances it.
    pub fn begin_frame(&mut self) {
        self.cipher.nonce_u32(self.nonce);
        self.nonce = self.nonce.wrapping_add(1);
    }

    /// Encrypts part of the current frame in place.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.cipher.encrypt(buf);
    }

    /// Decrypts part of the current frame in place.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.cipher.decrypt(buf);
    }

    /// Returns the authentication tag of the current frame.
    pub fn finish(&mut self) -> [u8; TAG_SIZE] {
        let mut tag = [0u8; TAG_SIZE];
        self.cipher.finish(&mut tag);
        tag
    }

    /// Number of frames started so far in this direction.
    pub fn frame_count(&self) -> u32 {
        self.nonce
    }
}

impl std::fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCipher")
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}
