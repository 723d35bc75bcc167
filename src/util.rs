/// Types that have a width in local slots or stack entries
///
/// On the JVM, `long` and `double` occupy two consecutive slots; everything
/// else occupies one.
pub trait Width {
    fn width(&self) -> usize;
}
