mod meta;
mod obj;

pub use meta::{
    AbsentView, HOT_THRESHOLD, MetaFlags, MetaView, NULL_MASK, NULL_WORD,
    OBJ_DATA_ADDR_SHIFT, OBJ_ID_BITS, OBJ_ID_SHIFT, OBJ_SIZE_SHIFT, PresentView,
    PtrMeta, decode_word, deref_exceptions,
};
pub use obj::{
    BACK_PTR_SIZE, HEADER_SIZE, MAX_OBJECT_DATA_SIZE, MAX_OBJECT_ID_SIZE,
    MAX_OBJECT_SIZE, Object, id_fragment,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_object(data_len: u16, id: &[u8]) -> Vec<u8> {
        let total = HEADER_SIZE + data_len as usize + id.len();
        let mut buf = vec![0u8; total];
        let obj = Object::new(buf.as_mut_ptr() as usize);
        unsafe { obj.init(3, data_len, id) };
        buf
    }

    // ── Object layout ──────────────────────────────────────────────

    #[test]
    fn object_header_round_trip() {
        let id = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut buf = raw_object(100, &id);
        let obj = Object::new(buf.as_mut_ptr() as usize);
        unsafe {
            assert_eq!(obj.ds_id(), 3);
            assert_eq!(obj.data_len(), 100);
            assert_eq!(obj.id_len(), 4);
            assert_eq!(obj.obj_id(), &id);
            assert_eq!(obj.size(), HEADER_SIZE as u16 + 100 + 4);
            assert_eq!(obj.data_addr(), obj.addr() + HEADER_SIZE);
        }
    }

    #[test]
    fn back_ptr_round_trip_is_48_bits() {
        let mut buf = raw_object(8, &[1]);
        let obj = Object::new(buf.as_mut_ptr() as usize);
        let addr = 0x0000_7FFF_FFFF_FFF8usize;
        unsafe {
            obj.set_back_ptr(addr);
            assert_eq!(obj.back_ptr(), addr);
            // data_len sits right after the 6 back-ptr bytes and must survive.
            assert_eq!(obj.data_len(), 8);
        }
    }

    #[test]
    fn freed_sentinel() {
        let mut buf = raw_object(16, &[7, 7]);
        let obj = Object::new(buf.as_mut_ptr() as usize);
        unsafe {
            obj.set_back_ptr(0x1000);
            assert!(!obj.is_freed());
            obj.mark_freed();
            assert!(obj.is_freed());
            // The rest of the header still decodes so scans can step over it.
            assert_eq!(obj.size(), HEADER_SIZE as u16 + 16 + 2);
        }
    }

    #[test]
    fn id_fragment_zero_extends() {
        assert_eq!(id_fragment(&[]), 0);
        assert_eq!(id_fragment(&[0x34, 0x12]), 0x1234);
        let long = [0x11u8; 12];
        assert_eq!(id_fragment(&long), 0x1111_1111_1111_1111);
    }

    #[test]
    fn size_limits() {
        assert_eq!(MAX_OBJECT_DATA_SIZE, 65_270);
        assert_eq!(MAX_OBJECT_ID_SIZE, 255);
    }

    // ── Metadata word ──────────────────────────────────────────────

    #[test]
    fn null_word_decodes_null() {
        let meta = PtrMeta::new_null();
        assert!(meta.is_null());
        assert!(!meta.is_present());
        assert_eq!(meta.decode(), MetaView::Null);
        // The low byte is ignored by the null check.
        assert_eq!(decode_word(NULL_WORD | 0x5A), MetaView::Null);
    }

    #[test]
    fn publish_present_writes_back_ptr() {
        let mut buf = raw_object(32, &[9; 8]);
        let meta = PtrMeta::new_null();
        unsafe { meta.init_present(buf.as_mut_ptr() as usize) };

        let obj = Object::new(buf.as_mut_ptr() as usize);
        assert_eq!(unsafe { obj.back_ptr() }, meta.addr());

        match meta.decode() {
            MetaView::Present(v) => {
                assert_eq!(v.data_addr, obj.data_addr());
                assert!(v.dirty, "newborn objects are dirty");
                assert!(!v.hot);
                assert!(!v.evacuating);
            }
            other => panic!("expected present, got {other:?}"),
        }
    }

    #[test]
    fn swap_in_form_is_clean() {
        let mut buf = raw_object(32, &[9; 8]);
        let meta = PtrMeta::new_null();
        unsafe { meta.set_present(buf.as_mut_ptr() as usize) };
        match meta.decode() {
            MetaView::Present(v) => assert!(!v.dirty),
            other => panic!("expected present, got {other:?}"),
        }
    }

    #[test]
    fn write_back_form_round_trips() {
        let meta = PtrMeta::new_null();
        let mut buf = raw_object(32, &[9; 8]);
        unsafe { meta.init_present(buf.as_mut_ptr() as usize) };

        meta.gc_wb(7, 50, (1 << OBJ_ID_BITS) - 1);
        match meta.decode() {
            MetaView::Absent(v) => {
                assert_eq!(v.ds_id, 7);
                assert_eq!(v.object_size, 50);
                assert_eq!(v.obj_id, (1 << OBJ_ID_BITS) - 1);
            }
            other => panic!("expected absent, got {other:?}"),
        }
        assert!(!meta.is_null());
    }

    #[test]
    fn evacuation_skips_absent_and_null() {
        let meta = PtrMeta::new_null();
        assert!(!meta.set_evacuating());
        assert!(meta.is_null(), "null word must stay null");

        meta.gc_wb(1, 40, 99);
        assert!(!meta.set_evacuating());
        assert_eq!(
            meta.decode(),
            MetaView::Absent(AbsentView {
                ds_id: 1,
                object_size: 40,
                obj_id: 99,
                shared: false
            })
        );
    }

    #[test]
    fn evacuation_and_mutator_copy() {
        let mut buf = raw_object(32, &[9; 8]);
        let mut new_buf = raw_object(32, &[9; 8]);
        let meta = PtrMeta::new_null();
        unsafe { meta.init_present(buf.as_mut_ptr() as usize) };

        assert!(meta.set_evacuating());
        assert!(meta.is_evacuating());

        meta.mutator_copy(new_buf.as_mut_ptr() as usize);
        match meta.decode() {
            MetaView::Present(v) => {
                assert_eq!(v.data_addr, new_buf.as_mut_ptr() as usize + HEADER_SIZE);
                assert!(!v.evacuating, "migration clears the evacuation flag");
                assert!(v.dirty, "dirty state is carried over");
            }
            other => panic!("expected present, got {other:?}"),
        }
    }

    #[test]
    fn gc_copy_resets_hot_and_keeps_state() {
        let mut buf = raw_object(32, &[9; 8]);
        let mut new_buf = raw_object(32, &[9; 8]);
        let meta = PtrMeta::new_null();
        unsafe { meta.set_present(buf.as_mut_ptr() as usize) };
        meta.set_evacuating();

        // Drive the countdown to hot.
        for _ in 0..HOT_THRESHOLD {
            meta.dec_hot();
        }
        assert!(meta.is_hot());

        meta.gc_copy(new_buf.as_mut_ptr() as usize);
        match meta.decode() {
            MetaView::Present(v) => {
                assert_eq!(v.data_addr, new_buf.as_mut_ptr() as usize + HEADER_SIZE);
                assert!(!v.hot, "relocation re-arms the countdown");
                assert!(!v.evacuating);
                assert!(!v.dirty, "clean state is carried over");
            }
            other => panic!("expected present, got {other:?}"),
        }
    }

    #[test]
    fn hot_countdown_borrows_into_hot() {
        let mut buf = raw_object(32, &[9; 8]);
        let meta = PtrMeta::new_null();
        unsafe { meta.set_present(buf.as_mut_ptr() as usize) };
        assert!(!meta.is_hot());

        // HOT_THRESHOLD accesses flip the inverted bit via borrow.
        for _ in 0..HOT_THRESHOLD {
            assert!(!meta.is_hot());
            meta.dec_hot();
        }
        assert!(meta.is_hot());

        meta.clear_hot();
        assert!(!meta.is_hot());
    }

    #[test]
    fn mut_access_sets_present_and_dirty() {
        let mut buf = raw_object(32, &[9; 8]);
        let meta = PtrMeta::new_null();
        unsafe { meta.set_present(buf.as_mut_ptr() as usize) };
        assert!(!meta.is_dirty());

        meta.set_present_dirty();
        assert!(meta.is_dirty());
        assert!(meta.is_present());
    }

    #[test]
    fn exception_masks() {
        let flags = MetaFlags::HOT_CLEARED
            | MetaFlags::PRESENT_CLEARED
            | MetaFlags::EVACUATING;
        assert_eq!(deref_exceptions(false), flags.bits());
        assert_eq!(
            deref_exceptions(true),
            (flags | MetaFlags::DIRTY_CLEARED).bits()
        );
    }

    #[test]
    fn decode_is_total() {
        // A handful of adversarial words all land in a legal form.
        for word in [
            0u64,
            !0u64,
            NULL_WORD,
            NULL_WORD | 0xFF,
            MetaFlags::PRESENT_CLEARED.bits() | (1 << OBJ_ID_SHIFT),
            MetaFlags::EVACUATING.bits() | (0xABCD << OBJ_DATA_ADDR_SHIFT),
        ] {
            match decode_word(word) {
                MetaView::Null | MetaView::Present(_) | MetaView::Absent(_) => {}
            }
        }
    }
}
