use thiserror::Error;

#[derive(Debug, Error)]
pub enum RingBufferError {
    #[error("Buffer is empty")]
    Empty,
}

/// 定长环形缓冲区，槽位用 `Option` 存放，元素无需 `Copy`
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: Vec<Option<T>>,
    read: usize,
    write: usize,
    full: bool,
}

impl<T> RingBuffer<T> {
    pub fn new(size: usize) -> Self {
        // 容量为0时无法取模
        let size = size.max(1);
        RingBuffer {
            buf: (0..size).map(|_| None).collect(),
            read: 0,
            write: 0,
            full: false,
        }
    }

    pub fn pop(&mut self) -> Result<T, RingBufferError> {
        if self.is_empty() {
            return Err(RingBufferError::Empty);
        }
        let item = self.buf[self.read].take().ok_or(RingBufferError::Empty)?;
        self.read = (self.read + 1) % self.buf.len();
        self.full = false;
        Ok(item)
    }

    pub fn push_overwrite(&mut self, item: T) {
        self.buf[self.write] = Some(item);
        self.write = (self.write + 1) % self.buf.len();
        if self.full {
            self.read = self.write;
        } else if self.write == self.read {
            self.full = true;
        }
    }

    /// 按从旧到新的顺序遍历，不消费元素
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let len = self.len();
        let cap = self.buf.len();
        (0..len).filter_map(move |i| self.buf[(self.read + i) % cap].as_ref())
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.read == self.write
    }

    pub fn len(&self) -> usize {
        if self.full {
            self.buf.len()
        } else {
            (self.write + self.buf.len() - self.read) % self.buf.len()
        }
    }
}
