/// Offset cursor over a `first`/`max` paginated admin listing.
///
/// A page shorter than the page size ends the listing; so does an empty one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    first: usize,
    page_size: usize,
    exhausted: bool,
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        Self {
            first: 0,
            page_size: page_size.max(1),
            exhausted: false,
        }
    }

    /// `(first, max)` of the next page to request, or `None` once the
    /// listing is exhausted.
    pub fn window(&self) -> Option<(usize, usize)> {
        if self.exhausted {
            None
        } else {
            Some((self.first, self.page_size))
        }
    }

    pub fn advance(&mut self, received: usize) {
        if received < self.page_size {
            self.exhausted = true;
        } else {
            self.first += self.page_size;
        }
    }

    /// Stops the listing early, e.g. after a failed page fetch.
    pub fn stop(&mut self) {
        self.exhausted = true;
    }
}
