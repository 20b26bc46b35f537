//! Integration tests for types

#[cfg(test)]
mod tests {
    use warden_types::*;

    #[test]
    fn test_sentinel_id() {
        assert!(ResourceId::NONE.is_none());
        assert!(!ResourceId::new(7).is_none());
        assert_eq!(ResourceId::default(), ResourceId::NONE);
    }

    #[test]
    fn test_resource_id_ordering_follows_raw_value() {
        let mut ids = vec![ResourceId::new(3), ResourceId::new(1), ResourceId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![ResourceId::new(1), ResourceId::new(2), ResourceId::new(3)]);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&ResourceId::new(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&JobId::new(5)).unwrap(), "5");
        assert_eq!(format!("{}", ResourceId::new(42)), "#42");
        assert_eq!(format!("{}", JobId::new(5)), "job-5");
    }

    #[test]
    fn test_native_ptr_of_distinct_values() {
        let a = Box::new(1u32);
        let b = Box::new(1u32);
        assert_ne!(NativePtr::of(&*a), NativePtr::of(&*b));
        assert_eq!(NativePtr::of(&*a), NativePtr::of(&*a));
        assert_eq!(format!("{}", NativePtr::from_addr(255)), "0xff");
    }

    #[test]
    fn test_progress_clamps_fraction() {
        assert!((ProgressInfo::new(1.5).complete - 1.0).abs() < f64::EPSILON);
        assert!(ProgressInfo::new(-0.5).complete.abs() < f64::EPSILON);
        let info = ProgressInfo::new(0.25).with_message("reading");
        assert!((info.percentage() - 25.0).abs() < f64::EPSILON);
        assert_eq!(info.message.as_deref(), Some("reading"));
    }
}
