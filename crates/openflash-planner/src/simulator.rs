//! In-memory flash VM for plan self-checks
//!
//! Executes a command stream against a byte buffer with the device rules
//! enforced: whole-block erase before rewrite, write-once bytes between
//! erases, reads only from the open source block or from blocks still in
//! their initial state, one block-sized cache with per-byte validity, and
//! the destination cursor that `CHAINED_COPY` appends at. The production
//! interpreter lives on the device; this one exists so the test suite (and
//! cautious callers) can prove a plan performs its moves before shipping it.

use thiserror::Error;

use crate::command::{Command, CopyAddr, Plan};
use crate::layout::FlashLayout;
use crate::moves::Move;

/// Violations of the VM contract, reported with the command position
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// REBASE somewhere other than the first instruction
    #[error("command #{index}: REBASE is only legal as the first instruction")]
    RebaseNotFirst {
        /// Offending command position
        index: usize,
    },

    /// A block operand outside the working window
    #[error("command #{index}: block {block:#x} outside the working window")]
    OutsideWindow {
        /// Offending command position
        index: usize,
        /// Block operand
        block: u32,
    },

    /// Flash read without USE_BLOCK from a block no longer in its initial state
    #[error("command #{index}: read from block {block:#x} which is neither open nor untouched")]
    ReadWithoutOpen {
        /// Offending command position
        index: usize,
        /// Block read from
        block: u32,
    },

    /// Flash read of bytes holding no meaningful data (erased, never rewritten)
    #[error("command #{index}: read of erased bytes at {address:#x}")]
    ReadOfErasedBytes {
        /// Offending command position
        index: usize,
        /// First offending byte address
        address: u32,
    },

    /// Write to a byte that was not erased since it was last written
    #[error("command #{index}: write to unerased byte at {address:#x}")]
    WriteToUnerasedByte {
        /// Offending command position
        index: usize,
        /// First offending byte address
        address: u32,
    },

    /// LOAD_AND_FLUSH of a block that was already erased or rewritten
    #[error("command #{index}: LOAD_AND_FLUSH of touched block {block:#x}")]
    LoadOfTouchedBlock {
        /// Offending command position
        index: usize,
        /// Block operand
        block: u32,
    },

    /// Cache read of bytes nothing staged
    #[error("command #{index}: read of invalid cache bytes at offset {offset:#x}")]
    InvalidCacheRead {
        /// Offending command position
        index: usize,
        /// First offending cache offset
        offset: u32,
    },

    /// CHAINED_COPY with no destination cursor in effect
    #[error("command #{index}: CHAINED_COPY without a destination context")]
    ChainedWithoutContext {
        /// Offending command position
        index: usize,
    },

    /// Operand ranges that run past a block or the cache
    #[error("command #{index}: operand range out of bounds")]
    RangeOutOfBounds {
        /// Offending command position
        index: usize,
    },

    /// Replay did not reproduce a requested move
    #[error("move #{index} not satisfied by the executed plan")]
    MoveMismatch {
        /// Offending move position
        index: usize,
    },
}

/// Byte-accurate model of the target flash device plus its cache buffer
#[derive(Debug)]
pub struct FlashVm {
    layout: FlashLayout,
    flash: Vec<u8>,
    /// Byte holds meaningful data (initial image or written since erase)
    valid: Vec<bool>,
    /// Byte may be programmed (erased and not yet rewritten)
    writable: Vec<bool>,
    /// Block has been erased at least once
    touched: Vec<bool>,
    window: (u32, u32),
    open: Option<u32>,
    cursor: Option<(u32, u32)>,
    cache: Vec<u8>,
    cache_valid: Vec<bool>,
}

impl FlashVm {
    /// VM over a copy of `image`; the image length must cover every block
    /// the plan touches
    pub fn new(layout: FlashLayout, image: &[u8]) -> Self {
        let len = image.len();
        let blocks = len.div_ceil(layout.block_size() as usize);
        Self {
            layout,
            flash: image.to_vec(),
            valid: vec![true; len],
            writable: vec![false; len],
            touched: vec![false; blocks],
            window: (0, 0),
            open: None,
            cursor: None,
            cache: vec![0xff; layout.block_size() as usize],
            cache_valid: vec![false; layout.block_size() as usize],
        }
    }

    /// Final flash contents
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Run a whole command stream
    pub fn execute(&mut self, commands: &[Command]) -> Result<(), VmError> {
        for (index, command) in commands.iter().enumerate() {
            self.step(index, *command)?;
        }
        Ok(())
    }

    fn step(&mut self, index: usize, command: Command) -> Result<(), VmError> {
        match command {
            Command::Rebase {
                first_block,
                last_block,
            } => {
                if index != 0 {
                    return Err(VmError::RebaseNotFirst { index });
                }
                self.window = (first_block, last_block);
                self.cursor = None;
            }
            Command::UseBlock { block } => {
                self.check_window(index, block)?;
                self.open = Some(block);
            }
            Command::ReleaseBlock => {
                self.open = None;
                self.cursor = None;
                self.cache_valid.fill(false);
            }
            Command::Erase { block } => {
                self.check_window(index, block)?;
                self.erase_block(block);
            }
            Command::LoadAndFlush { block } => {
                self.check_window(index, block)?;
                if self.touched[block as usize] {
                    return Err(VmError::LoadOfTouchedBlock { index, block });
                }
                let base = self.layout.block_base(block) as usize;
                let size = self.layout.block_size() as usize;
                self.cache.copy_from_slice(&self.flash[base..base + size]);
                self.cache_valid.fill(true);
                self.erase_block(block);
            }
            Command::Copy {
                src,
                src_offset,
                length,
                dst,
                dst_offset,
            } => {
                let data = self.read(index, src, src_offset, length)?;
                self.write(index, dst, dst_offset, &data)?;
            }
            Command::ChainedCopy {
                src,
                src_offset,
                length,
            } => {
                let (block, offset) = self
                    .cursor
                    .ok_or(VmError::ChainedWithoutContext { index })?;
                let data = self.read(index, src, src_offset, length)?;
                self.write(index, CopyAddr::Block(block), offset, &data)?;
            }
            Command::FlushAndPartialCommit { block, length } => {
                self.check_window(index, block)?;
                let size = self.layout.block_size();
                if length > size {
                    return Err(VmError::RangeOutOfBounds { index });
                }
                for offset in 0..length {
                    if !self.cache_valid[offset as usize] {
                        return Err(VmError::InvalidCacheRead {
                            index,
                            offset,
                        });
                    }
                }
                self.erase_block(block);
                let base = self.layout.block_base(block) as usize;
                for offset in 0..length as usize {
                    self.flash[base + offset] = self.cache[offset];
                    self.valid[base + offset] = true;
                    self.writable[base + offset] = false;
                }
                self.cursor = Some((block, length));
            }
        }
        Ok(())
    }

    fn check_window(&self, index: usize, block: u32) -> Result<(), VmError> {
        if block < self.window.0 || block > self.window.1 {
            return Err(VmError::OutsideWindow { index, block });
        }
        Ok(())
    }

    fn erase_block(&mut self, block: u32) {
        let base = self.layout.block_base(block) as usize;
        let size = self.layout.block_size() as usize;
        self.flash[base..base + size].fill(0xff);
        self.valid[base..base + size].fill(false);
        self.writable[base..base + size].fill(true);
        self.touched[block as usize] = true;
        self.cursor = None;
    }

    fn read(
        &self,
        index: usize,
        src: CopyAddr,
        offset: u32,
        length: u32,
    ) -> Result<Vec<u8>, VmError> {
        match src {
            CopyAddr::Cache => {
                let end = offset.checked_add(length).map(|e| e as usize);
                match end {
                    Some(end) if end <= self.cache.len() => {}
                    _ => return Err(VmError::RangeOutOfBounds { index }),
                }
                for at in offset..offset + length {
                    if !self.cache_valid[at as usize] {
                        return Err(VmError::InvalidCacheRead { index, offset: at });
                    }
                }
                Ok(self.cache[offset as usize..(offset + length) as usize].to_vec())
            }
            CopyAddr::Block(block) => {
                self.check_window(index, block)?;
                if offset + length > self.layout.block_size() {
                    return Err(VmError::RangeOutOfBounds { index });
                }
                if self.touched[block as usize] && self.open != Some(block) {
                    return Err(VmError::ReadWithoutOpen { index, block });
                }
                let base = self.layout.block_base(block);
                for at in base + offset..base + offset + length {
                    if !self.valid[at as usize] {
                        return Err(VmError::ReadOfErasedBytes { index, address: at });
                    }
                }
                let start = (base + offset) as usize;
                Ok(self.flash[start..start + length as usize].to_vec())
            }
        }
    }

    fn write(
        &mut self,
        index: usize,
        dst: CopyAddr,
        offset: u32,
        data: &[u8],
    ) -> Result<(), VmError> {
        match dst {
            CopyAddr::Cache => {
                let end = offset as usize + data.len();
                if end > self.cache.len() {
                    return Err(VmError::RangeOutOfBounds { index });
                }
                self.cache[offset as usize..end].copy_from_slice(data);
                self.cache_valid[offset as usize..end].fill(true);
                self.cursor = None;
            }
            CopyAddr::Block(block) => {
                self.check_window(index, block)?;
                if offset as usize + data.len() > self.layout.block_size() as usize {
                    return Err(VmError::RangeOutOfBounds { index });
                }
                let base = self.layout.block_base(block);
                for (i, &byte) in data.iter().enumerate() {
                    let at = (base + offset) as usize + i;
                    if !self.writable[at] {
                        return Err(VmError::WriteToUnerasedByte {
                            index,
                            address: at as u32,
                        });
                    }
                    self.flash[at] = byte;
                    self.valid[at] = true;
                    self.writable[at] = false;
                }
                self.cursor = Some((block, offset + data.len() as u32));
            }
        }
        Ok(())
    }
}

/// Deterministic non-repeating byte pattern for simulator images
pub fn patterned_image(len: usize) -> Vec<u8> {
    // splitmix64 over the byte index; stable across platforms
    (0..len)
        .map(|i| {
            let mut z = (i as u64).wrapping_add(0x9e37_79b9_7f4a_7c15);
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            (z ^ (z >> 31)) as u8
        })
        .collect()
}

/// Execute `plan` on a patterned image and check that every requested move
/// landed: `final[dst..dst+len] == initial[src..src+len]` for all moves.
pub fn verify_plan(layout: &FlashLayout, moves: &[Move], plan: &Plan) -> Result<(), VmError> {
    let image = patterned_image(layout.flash_size() as usize);
    let mut vm = FlashVm::new(*layout, &image);
    vm.execute(plan.commands())?;

    for (index, m) in moves.iter().enumerate() {
        let src = layout.wrap(m.source) as usize;
        let dst = layout.wrap(m.destination) as usize;
        let len = m.length as usize;
        if vm.flash()[dst..dst + len] != image[src..src + len] {
            return Err(VmError::MoveMismatch { index });
        }
    }
    Ok(())
}
