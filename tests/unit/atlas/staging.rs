use super::*;

#[test]
fn zero_sized_buffer_is_rejected() {
    assert!(SharedStagingBuffer::new(0).is_err());
}

#[test]
fn allocations_are_aligned_and_bounded() {
    let mut s = SharedStagingBuffer::new(64).unwrap();
    assert_eq!(s.allocate(3, 4), Some(0));
    assert_eq!(s.allocate(8, 16), Some(16));
    assert_eq!(s.used(), 24);
    assert_eq!(s.allocate(40, 4), Some(24));
    assert_eq!(s.allocate(1, 1), None);
    assert_eq!(s.used(), 64);

    s.reset();
    assert_eq!(s.used(), 0);
    assert_eq!(s.allocate(64, 4), Some(0));
}

#[test]
fn failed_allocation_keeps_the_cursor() {
    let mut s = SharedStagingBuffer::new(32).unwrap();
    s.allocate(10, 1).unwrap();
    assert_eq!(s.allocate(30, 1), None);
    assert_eq!(s.used(), 10);
    assert_eq!(s.allocate(u64::MAX, 1), None);
}

#[test]
fn written_bytes_read_back() {
    let mut s = SharedStagingBuffer::new(16).unwrap();
    let off = s.allocate(4, 4).unwrap();
    s.write(off, &[1, 2, 3, 4]);
    assert_eq!(s.bytes(off, 4), Some(&[1u8, 2, 3, 4][..]));
    assert_eq!(s.bytes(14, 4), None);
}

#[test]
fn shared_handle_is_visible_to_all_clones() {
    let a = SharedStagingBuffer::shared(16).unwrap();
    let b = a.clone();
    a.borrow_mut().allocate(8, 1).unwrap();
    assert_eq!(b.borrow().used(), 8);
}
