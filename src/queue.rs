//! Ordered command queue with token assignment and the rationalization pass
//! that drops stale variable/stack queries once execution moves.

use std::collections::VecDeque;

use tracing::debug;

use crate::mi::commands::{CommandFlags, GdbCommand};

const IMMEDIATE: CommandFlags = CommandFlags::IMMEDIATELY.union(CommandFlags::INTERRUPT);

#[derive(Default)]
pub struct CommandQueue {
    commands: VecDeque<GdbCommand>,
    immediate: usize,
    last_token: u32,
}

impl CommandQueue {
    pub fn new() -> Self {
        CommandQueue::default()
    }

    /// Append a command, assigning its token. If the command moves the
    /// execution location, pending variable and stack queries are removed
    /// first: their answers would describe a location that no longer exists.
    pub fn enqueue(&mut self, mut command: GdbCommand) {
        self.last_token = self.last_token.wrapping_add(1);
        if self.last_token == 0 {
            self.last_token = 1;
        }
        command.assign_token(self.last_token);

        if command.kind().moves_execution() {
            self.remove_stale_queries();
        }

        if command.flags().intersects(IMMEDIATE) {
            self.immediate += 1;
        }
        self.commands.push_back(command);
        self.dump();
    }

    fn remove_stale_queries(&mut self) {
        let before = self.commands.len();
        let mut dropped_immediate = 0;
        self.commands.retain(|cmd| {
            let stale = cmd.kind().stale_when_execution_moves();
            if stale && cmd.flags().intersects(IMMEDIATE) {
                dropped_immediate += 1;
            }
            !stale
        });
        self.immediate -= dropped_immediate;
        let dropped = before - self.commands.len();
        if dropped > 0 {
            debug!("rationalized queue, dropped {dropped} stale var/stack queries");
        }
    }

    /// Retrieve and remove the next command.
    pub fn next_command(&mut self) -> Option<GdbCommand> {
        let command = self.commands.pop_front()?;
        if command.flags().intersects(IMMEDIATE) {
            self.immediate -= 1;
        }
        Some(command)
    }

    /// Drop every queued command without firing any handler. Callers must
    /// treat the removed commands as never having existed.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.immediate = 0;
    }

    pub fn count(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn has_immediate_command(&self) -> bool {
        self.immediate > 0
    }

    pub fn immediate_count(&self) -> usize {
        self.immediate
    }

    fn dump(&self) {
        debug!("pending commands: {}", self.commands.len());
        for (num, command) in self.commands.iter().enumerate() {
            debug!("  command {num}: {}", command.initial_string());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mi::commands::CommandKind;

    fn cmd(kind: CommandKind, text: &str) -> GdbCommand {
        GdbCommand::new(kind, text)
    }

    #[test]
    fn tokens_are_assigned_in_order_and_nonzero() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(CommandKind::GdbSet, "width 0"));
        queue.enqueue(cmd(CommandKind::GdbSet, "height 0"));
        let first = queue.next_command().unwrap();
        let second = queue.next_command().unwrap();
        assert_eq!(first.token(), 1);
        assert_eq!(second.token(), 2);
    }

    #[test]
    fn token_wrap_skips_zero() {
        let mut queue = CommandQueue::new();
        queue.last_token = u32::MAX;
        queue.enqueue(cmd(CommandKind::GdbSet, "width 0"));
        assert_eq!(queue.next_command().unwrap().token(), 1);
    }

    #[test]
    fn execution_command_drops_pending_var_and_stack_queries() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(CommandKind::VarUpdate, "*"));
        queue.enqueue(cmd(CommandKind::StackListLocals, "0"));
        queue.enqueue(cmd(CommandKind::ExecContinue, ""));
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.next_command().unwrap().kind(), CommandKind::ExecContinue);
    }

    #[test]
    fn rationalization_spares_unrelated_commands() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(CommandKind::BreakInsert, "main"));
        queue.enqueue(cmd(CommandKind::VarAssign, "var1 0"));
        queue.enqueue(cmd(CommandKind::StackListFrames, ""));
        queue.enqueue(cmd(CommandKind::ExecNext, ""));
        let kinds: Vec<_> = std::iter::from_fn(|| queue.next_command()).map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![CommandKind::BreakInsert, CommandKind::VarAssign, CommandKind::ExecNext]
        );
    }

    #[test]
    fn exec_arguments_does_not_invalidate() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(CommandKind::VarUpdate, "*"));
        queue.enqueue(cmd(CommandKind::ExecArguments, "--fast"));
        assert_eq!(queue.count(), 2);
    }

    #[test]
    fn enqueueing_execution_twice_invalidates_nothing_extra() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(CommandKind::VarUpdate, "*"));
        queue.enqueue(cmd(CommandKind::ExecContinue, ""));
        assert_eq!(queue.count(), 1);
        queue.enqueue(cmd(CommandKind::ExecContinue, ""));
        assert_eq!(queue.count(), 2);
    }

    #[test]
    fn immediate_counter_tracks_flagged_entries() {
        let mut queue = CommandQueue::new();
        assert!(!queue.has_immediate_command());
        queue.enqueue(cmd(CommandKind::ExecInterrupt, "").with_flags(CommandFlags::INTERRUPT));
        queue.enqueue(cmd(CommandKind::BreakList, ""));
        assert!(queue.has_immediate_command());
        assert_eq!(queue.immediate_count(), 1);
        queue.next_command();
        assert!(!queue.has_immediate_command());
    }

    #[test]
    fn immediate_counter_decremented_for_invalidated_entries() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(CommandKind::VarUpdate, "*").with_flags(CommandFlags::IMMEDIATELY));
        assert_eq!(queue.immediate_count(), 1);
        queue.enqueue(cmd(CommandKind::ExecContinue, ""));
        assert_eq!(queue.immediate_count(), 0);
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn clear_discards_everything() {
        let mut queue = CommandQueue::new();
        queue.enqueue(cmd(CommandKind::GdbExit, ""));
        queue.enqueue(cmd(CommandKind::TargetDetach, "").with_flags(CommandFlags::IMMEDIATELY));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.immediate_count(), 0);
        assert!(queue.next_command().is_none());
    }
}
