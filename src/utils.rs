/// Evaluates `$expr` and emits a `debug` event with how long it took.
///
/// ```ignore
/// let octree = timed!(Octree::from_point_cloud(12, &cloud)?, "octree build");
/// ```
macro_rules! timed {
    ($expr:expr, $label:expr) => {{
        let start = std::time::Instant::now();
        let result = $expr;
        tracing::debug!(elapsed = ?start.elapsed(), "{}", $label);
        result
    }};
}
pub(crate) use timed;

#[test]
fn timed_passes_value_through() {
    let value = timed!(2 + 2, "arithmetic");
    assert_eq!(value, 4);
}
