/// Maximal run of equal values in a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run<T> {
    pub value: T,
    pub len: usize,
}

/// Iterator over the maximal runs of a sequence, see [`run_lengths`]
pub struct RunLengths<I: Iterator> {
    inner: std::iter::Peekable<I>,
}

impl<I> Iterator for RunLengths<I>
where
    I: Iterator,
    I::Item: PartialEq,
{
    type Item = Run<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.inner.next()?;
        let mut len = 1;
        while self.inner.next_if(|next| *next == value).is_some() {
            len += 1;
        }
        Some(Run { value, len })
    }
}

/// Run-length encode a sequence
pub fn run_lengths<I>(values: I) -> RunLengths<I::IntoIter>
where
    I: IntoIterator,
    I::Item: PartialEq,
{
    RunLengths {
        inner: values.into_iter().peekable(),
    }
}

/// Length of the longest run of `false` (0 when there is none)
pub fn longest_false_run<I>(mask: I) -> usize
where
    I: IntoIterator<Item = bool>,
{
    run_lengths(mask)
        .filter(|run| !run.value)
        .map(|run| run.len)
        .max()
        .unwrap_or(0)
}
