/// Left-folds an observable through a list of operators.
///
/// # Example
///
/// ```rust
/// use wirelink_core::{pipe, map, share, Observable};
/// let doubled = pipe!(Observable::<i32, String>::of(2), map(|v: i32| v * 2), share());
/// # let _ = doubled;
/// ```
#[macro_export]
macro_rules! pipe {
    ($source:expr $(, $operator:expr)* $(,)?) => {{
        let source = $source;
        $(
            let source = source.pipe($operator);
        )*
        source
    }};
}
