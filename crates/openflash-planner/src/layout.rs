//! Flash geometry
//!
//! The original scheduler kept the block-size and flash-size exponents in
//! module-level mutables set once at startup. Here they are plain values
//! carried by [`FlashLayout`], so two planners with different geometry can
//! coexist and tests can run in parallel.

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};

/// Smallest supported block size exponent (256-byte blocks)
pub const MIN_BLOCK_SIZE_BIT: u8 = 8;
/// Largest supported block size exponent (1 MiB blocks)
pub const MAX_BLOCK_SIZE_BIT: u8 = 20;
/// Default block size exponent (4096-byte blocks)
pub const DEFAULT_BLOCK_SIZE_BIT: u8 = 12;
/// Default flash size exponent (4 MiB address space)
pub const DEFAULT_FLASH_SIZE_BIT: u8 = 22;

/// Geometry configuration, fixed at planner construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// log2 of the erase-block size
    pub block_size_bit: u8,
    /// log2 of the addressable flash size; addresses are reduced modulo it
    pub flash_size_bit: u8,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            block_size_bit: DEFAULT_BLOCK_SIZE_BIT,
            flash_size_bit: DEFAULT_FLASH_SIZE_BIT,
        }
    }
}

/// Validated flash geometry with the derived masks precomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashLayout {
    block_size_bit: u8,
    flash_size_bit: u8,
}

impl FlashLayout {
    /// Validate a configuration and freeze it into a layout
    pub fn new(config: PlannerConfig) -> PlanResult<Self> {
        if !(MIN_BLOCK_SIZE_BIT..=MAX_BLOCK_SIZE_BIT).contains(&config.block_size_bit) {
            return Err(PlanError::BlockSizeBitOutOfRange(config.block_size_bit));
        }
        if config.flash_size_bit < config.block_size_bit || config.flash_size_bit > 32 {
            return Err(PlanError::FlashSizeBitOutOfRange {
                flash_size_bit: config.flash_size_bit,
                block_size_bit: config.block_size_bit,
            });
        }
        Ok(Self {
            block_size_bit: config.block_size_bit,
            flash_size_bit: config.flash_size_bit,
        })
    }

    /// Erase-block size in bytes
    #[inline]
    pub fn block_size(&self) -> u32 {
        1 << self.block_size_bit
    }

    /// Addressable flash size in bytes
    #[inline]
    pub fn flash_size(&self) -> u64 {
        1 << self.flash_size_bit
    }

    /// Mask selecting the in-block offset bits of an address
    #[inline]
    pub fn offset_mask(&self) -> u32 {
        self.block_size() - 1
    }

    /// Block index containing `address`
    #[inline]
    pub fn block_of(&self, address: u32) -> u32 {
        self.wrap(address) >> self.block_size_bit
    }

    /// Offset of `address` within its block
    #[inline]
    pub fn offset_of(&self, address: u32) -> u32 {
        self.wrap(address) & self.offset_mask()
    }

    /// First byte address of block `index`
    #[inline]
    pub fn block_base(&self, index: u32) -> u32 {
        index << self.block_size_bit
    }

    /// Reduce an address modulo the flash size
    #[inline]
    pub fn wrap(&self, address: u32) -> u32 {
        (u64::from(address) & (self.flash_size() - 1)) as u32
    }

    /// Bytes remaining in the block containing `address`
    #[inline]
    pub fn remaining_in_block(&self, address: u32) -> u32 {
        self.block_size() - self.offset_of(address)
    }
}
