//! Queue ordering properties under mixed insertion sequences.

use libreshunt_core::protocol::{Command, CommandQueue, InsertOutcome, ResponseState};
use libreshunt_core::registers::catalogue::{REG_RELAY_STATE, REG_SOC};

fn get(address: u16, priority: u8) -> Command {
    Command::get(address).unwrap().with_priority(priority)
}

#[test]
fn test_priorities_non_increasing_under_mixed_inserts() {
    let mut q = CommandQueue::new(false);
    for (addr, prio) in [
        (0x1000u16, 0u8),
        (0x1001, 1),
        (0x1002, 0),
        (0x1003, 1),
        (0x1004, 1),
        (0x1005, 0),
        (0x1006, 1),
    ] {
        q.insert(get(addr, prio));
        assert!(q.priorities_non_increasing(), "violated after {:#06x}", addr);
    }
    assert_eq!(q.len(), 7);
    // the head never moved
    assert_eq!(q.head().unwrap().message().address, Some(0x1000));
}

#[test]
fn test_priority_class_preserves_insertion_order() {
    let mut q = CommandQueue::new(false);
    q.insert(get(0x1000, 0));
    q.insert(get(0x2001, 1));
    q.insert(get(0x2002, 1));
    q.insert(get(0x3001, 0));
    q.insert(get(0x3002, 0));
    let addrs: Vec<_> = q.iter().map(|c| c.message().address.unwrap()).collect();
    assert_eq!(addrs, vec![0x1000, 0x2001, 0x2002, 0x3001, 0x3002]);
}

#[test]
fn test_relay_flip_compression() {
    let mut q = CommandQueue::new(true);
    // one command already inflight at the head
    q.insert(get(REG_SOC, 0));
    q.insert(Command::set(REG_RELAY_STATE, 1, 1).unwrap());
    q.insert(Command::set(REG_RELAY_STATE, 0, 1).unwrap());
    q.insert(Command::set(REG_RELAY_STATE, 1, 1).unwrap());
    assert_eq!(q.len(), 2);
    let tail = q.tail().unwrap();
    assert_eq!(tail.message().value.as_deref(), Some("01"));
}

#[test]
fn test_repeated_same_identifier_compresses_to_length_two() {
    let mut q = CommandQueue::new(true);
    q.insert(get(REG_SOC, 0));
    for value in 0..6 {
        q.insert(Command::set(0x1000, value, 2).unwrap());
    }
    assert_eq!(q.len(), 2);
    assert_eq!(q.tail().unwrap().message().value.as_deref(), Some("0005"));
}

#[test]
fn test_compression_off_keeps_every_entry() {
    let mut q = CommandQueue::new(false);
    q.insert(get(REG_SOC, 0));
    q.insert(Command::set(REG_RELAY_STATE, 1, 1).unwrap());
    q.insert(Command::set(REG_RELAY_STATE, 0, 1).unwrap());
    assert_eq!(q.len(), 3);
}

#[test]
fn test_wire_duplicate_dropped_even_with_compression_off() {
    let mut q = CommandQueue::new(false);
    q.insert(get(REG_SOC, 0));
    q.insert(Command::set(REG_RELAY_STATE, 1, 1).unwrap());
    let outcome = q.insert(Command::set(REG_RELAY_STATE, 1, 1).unwrap());
    assert_eq!(outcome, InsertOutcome::Duplicate);
    assert_eq!(q.len(), 2);
}

#[test]
fn test_delete_reports_unknown_identifier() {
    let mut q = CommandQueue::new(false);
    q.insert(get(REG_SOC, 0));
    assert_eq!(q.delete("7FF0F"), ResponseState::Ok);
    assert_eq!(q.delete("7FF0F"), ResponseState::UnknownId);
}

#[test]
fn test_same_identifier_twice_without_compression() {
    // both entries stay queued and retire one at a time
    let mut q = CommandQueue::new(false);
    q.insert(Command::set(0x1000, 100, 2).unwrap());
    q.insert(Command::set(0x1000, 200, 2).unwrap());
    assert_eq!(q.len(), 2);
    let head_id = q.head().unwrap().identifier().to_string();
    assert_eq!(q.delete(&head_id), ResponseState::Ok);
    assert_eq!(q.len(), 1);
    assert_eq!(q.head().unwrap().message().value.as_deref(), Some("00C8"));
}
