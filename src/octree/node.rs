use std::sync::atomic::{ AtomicU8, Ordering };

/// One octree cell: a bit per child slot that holds something.
///
/// Bits are only flipped with atomic OR/AND, so any number of builder
/// threads can mark children on the same node without a lock.
#[derive(Debug, Default)]
pub struct Node {
    children: AtomicU8,
}

impl Node {
    pub fn new(mask: u8) -> Self {
        Self {
            children: AtomicU8::new(mask),
        }
    }

    #[inline(always)]
    pub fn mask(&self) -> u8 {
        self.children.load(Ordering::Acquire)
    }

    /// Marks child `child_id`. Returns true if the bit was newly set.
    #[inline]
    pub fn add_child(&self, child_id: u8) -> bool {
        debug_assert!(child_id < 8);
        let bit = 1 << child_id;
        self.children.fetch_or(bit, Ordering::AcqRel) & bit == 0
    }

    #[inline]
    pub fn remove_child(&self, child_id: u8) {
        debug_assert!(child_id < 8);
        self.children.fetch_and(!(1 << child_id), Ordering::AcqRel);
    }

    #[inline(always)]
    pub fn has_child(&self, child_id: u8) -> bool {
        self.mask() & (1 << child_id) != 0
    }

    #[inline(always)]
    pub fn child_count(&self) -> u32 {
        self.mask().count_ones()
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Self::new(self.mask())
    }
}

#[test]
fn child_bits_are_idempotent() {
    let node = Node::default();
    assert!(node.add_child(3));
    assert!(!node.add_child(3));
    assert!(node.add_child(0));
    assert_eq!(node.mask(), 0b0000_1001);
    assert_eq!(node.child_count(), 2);

    node.remove_child(3);
    assert!(!node.has_child(3));
    assert!(node.has_child(0));
}

#[test]
fn concurrent_bit_setting() {
    let node = Node::default();
    std::thread::scope(|scope| {
        for child_id in 0..8u8 {
            let node = &node;
            scope.spawn(move || {
                for _ in 0..1000 {
                    node.add_child(child_id);
                }
            });
        }
    });
    assert_eq!(node.mask(), 0xff);
}
