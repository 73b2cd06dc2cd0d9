//! Serial allocation across leases, restarts and threads

use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Mutex};
use std::thread;

use anchor_pki::ca::{SerialCounter, SerialNumber};
use tempfile::TempDir;

fn serial(hex: &str) -> SerialNumber {
    SerialNumber::parse(hex).unwrap()
}

#[test]
fn test_committed_serial_is_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("serial");
    let counter = SerialCounter::initialize(&path, &serial("01")).unwrap();

    let lease = counter.allocate().unwrap();
    assert_eq!(lease.serial(), &serial("01"));
    assert_eq!(lease.commit().unwrap(), serial("02"));
    assert_eq!(fs::read_to_string(&path).unwrap().trim(), "02");

    // A fresh handle on the same file sees the advanced value
    let reopened = SerialCounter::new(&path);
    assert_eq!(reopened.peek().unwrap(), serial("02"));
}

#[test]
fn test_no_temp_file_left_behind() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("serial");
    let counter = SerialCounter::initialize(&path, &serial("0F")).unwrap();

    counter.allocate().unwrap().commit().unwrap();

    assert!(!temp_dir.path().join("serial.tmp").exists());
    assert_eq!(counter.peek().unwrap(), serial("10"));
}

#[test]
fn test_initialize_keeps_existing_counter() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("serial");
    fs::write(&path, "2A\n").unwrap();

    let counter = SerialCounter::initialize(&path, &serial("01")).unwrap();
    assert_eq!(counter.peek().unwrap(), serial("2A"));
}

#[test]
fn test_dropped_lease_does_not_consume_serial() {
    let temp_dir = TempDir::new().unwrap();
    let counter = SerialCounter::initialize(temp_dir.path().join("serial"), &serial("05")).unwrap();

    drop(counter.allocate().unwrap());
    assert_eq!(counter.allocate().unwrap().serial(), &serial("05"));
}

#[test]
fn test_concurrent_allocations_are_unique() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("serial");
    SerialCounter::initialize(&path, &serial("01")).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut handles = vec![];

    for _ in 0..8 {
        let path = path.clone();
        let seen = Arc::clone(&seen);
        handles.push(thread::spawn(move || {
            // Separate handles, as separate processes would have
            let counter = SerialCounter::new(&path);
            for _ in 0..10 {
                let lease = counter.allocate().unwrap();
                let allocated = lease.serial().clone();
                lease.commit().unwrap();
                seen.lock().unwrap().push(allocated);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let seen = seen.lock().unwrap();
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), 80);
    assert_eq!(unique.len(), 80, "a serial was handed out twice");
    assert_eq!(SerialCounter::new(&path).peek().unwrap(), serial("51"));
}
