/// Size of the staging area every driver instance allocates.
pub const STAGING_CAPACITY: usize = 512 * 1024;

/// Fixed-capacity byte ring that batches caller writes into whole chunks.
///
/// Bytes leave in the order they arrived. Unlike a lossy audio ring, a full
/// buffer refuses further bytes instead of dropping the oldest; callers copy
/// in slices and flush between them.
#[derive(Debug)]
pub struct StagingBuffer {
    buffer: Vec<u8>,
    read_index: usize,
    fill: usize,
    capacity: usize,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            read_index: 0,
            fill: 0,
            capacity,
        }
    }

    /// Append as much of `data` as fits. Returns the number of bytes copied.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let to_copy = data.len().min(self.vacant());
        if to_copy == 0 {
            return 0;
        }

        let write_index = self.write_index();
        let first = to_copy.min(self.capacity - write_index);
        self.buffer[write_index..write_index + first].copy_from_slice(&data[..first]);
        self.buffer[..to_copy - first].copy_from_slice(&data[first..to_copy]);

        self.fill += to_copy;
        to_copy
    }

    /// Append `len` bytes of silence, repeating `sample` from the phase the
    /// staged data ends at.
    ///
    /// Returns the number of bytes appended (bounded by free space).
    pub fn pad(&mut self, len: usize, sample: &[u8]) -> usize {
        let len = len.min(self.vacant());
        if sample.is_empty() {
            return 0;
        }

        let phase = self.fill % sample.len();
        let mut write_index = self.write_index();
        for i in 0..len {
            self.buffer[write_index] = sample[(phase + i) % sample.len()];
            write_index = (write_index + 1) % self.capacity;
        }

        self.fill += len;
        len
    }

    /// The next `len` staged bytes as one contiguous slice.
    ///
    /// Returns a slice of the ring itself when the bytes do not wrap, and
    /// otherwise assembles them in `scratch`. `len` is bounded by the fill.
    pub fn peek<'a>(&'a self, len: usize, scratch: &'a mut Vec<u8>) -> &'a [u8] {
        let len = len.min(self.fill);
        let tail = self.capacity - self.read_index;

        if len <= tail {
            return &self.buffer[self.read_index..self.read_index + len];
        }

        scratch.clear();
        scratch.extend_from_slice(&self.buffer[self.read_index..]);
        scratch.extend_from_slice(&self.buffer[..len - tail]);
        scratch.as_slice()
    }

    /// Drop `len` bytes from the front. Bounded by the fill.
    pub fn consume(&mut self, len: usize) {
        let len = len.min(self.fill);
        if self.capacity > 0 {
            self.read_index = (self.read_index + len) % self.capacity;
        }
        self.fill -= len;
    }

    /// Number of staged bytes.
    pub fn fill(&self) -> usize {
        self.fill
    }

    pub fn vacant(&self) -> usize {
        self.capacity - self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reset the buffer to empty state.
    pub fn reset(&mut self) {
        self.read_index = 0;
        self.fill = 0;
    }

    fn write_index(&self) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        (self.read_index + self.fill) % self.capacity
    }
}
