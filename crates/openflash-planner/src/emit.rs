//! Command assembly
//!
//! Thin stateful layer between the resolvers and the output stream. It
//! tracks the one source block the VM holds open (`USE_BLOCK`) and the
//! destination write cursor left behind by copies and partial commits, so
//! contiguous writes coalesce into `CHAINED_COPY` without the resolvers
//! thinking about operand encoding.

use crate::command::{Command, CopyAddr};

#[derive(Debug, Default)]
pub(crate) struct Emitter {
    commands: Vec<Command>,
    open: Option<u32>,
    cursor: Option<(u32, u32)>,
}

impl Emitter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Working window; skipped when it is the default single block 0
    pub(crate) fn rebase(&mut self, first_block: u32, last_block: u32) {
        if (first_block, last_block) != (0, 0) {
            self.commands.push(Command::Rebase {
                first_block,
                last_block,
            });
        }
    }

    /// Currently-open source block
    pub(crate) fn open_block(&self) -> Option<u32> {
        self.open
    }

    /// Open `block` for reading unless it already is open
    pub(crate) fn ensure_open(&mut self, block: u32) {
        if self.open != Some(block) {
            self.commands.push(Command::UseBlock { block });
            self.open = Some(block);
        }
    }

    /// Close the open block and drop stale cache content
    pub(crate) fn release(&mut self) {
        self.commands.push(Command::ReleaseBlock);
        self.open = None;
        self.cursor = None;
    }

    pub(crate) fn erase(&mut self, block: u32) {
        self.commands.push(Command::Erase { block });
        self.cursor = None;
    }

    pub(crate) fn load_and_flush(&mut self, block: u32) {
        self.ensure_open(block);
        self.commands.push(Command::LoadAndFlush { block });
        self.cursor = None;
    }

    pub(crate) fn flush_partial(&mut self, block: u32, length: u32) {
        self.commands.push(Command::FlushAndPartialCommit { block, length });
        self.cursor = Some((block, length));
    }

    /// Copy into a flash block, reading from another block's old contents
    pub(crate) fn copy_from_block(
        &mut self,
        src_block: u32,
        src_offset: u32,
        length: u32,
        dst_block: u32,
        dst_offset: u32,
    ) {
        self.ensure_open(src_block);
        self.push_write(CopyAddr::Block(src_block), src_offset, length, dst_block, dst_offset);
    }

    /// Copy into a flash block, reading staged cache bytes
    pub(crate) fn copy_from_cache(
        &mut self,
        cache_offset: u32,
        length: u32,
        dst_block: u32,
        dst_offset: u32,
    ) {
        self.push_write(CopyAddr::Cache, cache_offset, length, dst_block, dst_offset);
    }

    /// Park a block's old bytes into the cache buffer
    pub(crate) fn copy_to_cache(
        &mut self,
        src_block: u32,
        src_offset: u32,
        length: u32,
        cache_offset: u32,
    ) {
        self.ensure_open(src_block);
        self.commands.push(Command::Copy {
            src: CopyAddr::Block(src_block),
            src_offset,
            length,
            dst: CopyAddr::Cache,
            dst_offset: cache_offset,
        });
        self.cursor = None;
    }

    pub(crate) fn finish(self) -> Vec<Command> {
        self.commands
    }

    fn push_write(
        &mut self,
        src: CopyAddr,
        src_offset: u32,
        length: u32,
        dst_block: u32,
        dst_offset: u32,
    ) {
        if self.cursor == Some((dst_block, dst_offset)) {
            self.commands.push(Command::ChainedCopy {
                src,
                src_offset,
                length,
            });
        } else {
            self.commands.push(Command::Copy {
                src,
                src_offset,
                length,
                dst: CopyAddr::Block(dst_block),
                dst_offset,
            });
        }
        self.cursor = Some((dst_block, dst_offset + length));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_elided() {
        let mut emit = Emitter::new();
        emit.rebase(0, 0);
        assert!(emit.finish().is_empty());
    }

    #[test]
    fn use_block_is_deduplicated() {
        let mut emit = Emitter::new();
        emit.copy_from_block(0, 0x0, 0x10, 1, 0x0);
        emit.copy_from_block(0, 0x40, 0x10, 1, 0x100);
        let commands = emit.finish();
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, Command::UseBlock { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn contiguous_writes_chain() {
        let mut emit = Emitter::new();
        emit.copy_from_block(0, 0x0, 0x10, 1, 0x0);
        emit.copy_from_cache(0x80, 0x20, 1, 0x10);
        emit.copy_from_block(0, 0x40, 0x10, 1, 0x40);
        let commands = emit.finish();
        assert_eq!(
            commands,
            vec![
                Command::UseBlock { block: 0 },
                Command::Copy {
                    src: CopyAddr::Block(0),
                    src_offset: 0x0,
                    length: 0x10,
                    dst: CopyAddr::Block(1),
                    dst_offset: 0x0,
                },
                Command::ChainedCopy {
                    src: CopyAddr::Cache,
                    src_offset: 0x80,
                    length: 0x20,
                },
                Command::Copy {
                    src: CopyAddr::Block(0),
                    src_offset: 0x40,
                    length: 0x10,
                    dst: CopyAddr::Block(1),
                    dst_offset: 0x40,
                },
            ]
        );
    }

    #[test]
    fn partial_commit_seeds_the_cursor() {
        let mut emit = Emitter::new();
        emit.flush_partial(3, 0x64);
        emit.ensure_open(2);
        emit.copy_from_block(2, 0x64, 0x64, 3, 0x64);
        let commands = emit.finish();
        assert_eq!(
            commands[2],
            Command::ChainedCopy {
                src: CopyAddr::Block(2),
                src_offset: 0x64,
                length: 0x64,
            }
        );
    }

    #[test]
    fn erase_invalidates_the_cursor() {
        let mut emit = Emitter::new();
        emit.copy_from_cache(0x0, 0x10, 1, 0x0);
        emit.erase(2);
        emit.copy_from_cache(0x10, 0x10, 1, 0x10);
        let commands = emit.finish();
        assert!(matches!(commands[2], Command::Copy { .. }));
    }
}
