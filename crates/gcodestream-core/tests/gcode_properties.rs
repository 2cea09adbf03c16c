//! Property tests for the G-code line utilities

use gcodestream_core::{first_number_after, format_number, get_position, PrinterMove};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_comment_digits_never_parsed(x in -500.0f64..500.0, noise in -500.0f64..500.0) {
        let line = format!("G1 X{} ; Y{} Z{} E{}", format_number(x), noise, noise, noise);
        let parsed = first_number_after("X", &line).unwrap();
        prop_assert!((parsed - x).abs() < 0.0006);
        prop_assert_eq!(first_number_after("Y", &line), None);
        prop_assert_eq!(first_number_after("Z", &line), None);
        prop_assert_eq!(first_number_after("E", &line), None);
    }

    #[test]
    fn test_get_position_only_touches_named_axes(z in 0.0f64..300.0) {
        let mut last = PrinterMove::ZERO;
        last.position.x = 12.0;
        last.feed_rate = 1800.0;
        let line = format!("G1 Z{}", format_number(z));
        let next = get_position(&line, last);
        prop_assert_eq!(next.position.x, 12.0);
        prop_assert_eq!(next.position.y, 0.0);
        prop_assert_eq!(next.feed_rate, 1800.0);
        prop_assert!((next.position.z - z).abs() < 0.0006);
    }
}
