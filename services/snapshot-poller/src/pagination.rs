//! Paginated enumeration
//!
//! Pages are pulled one at a time from a [`ListPages`] source. Enumeration
//! stops once the provider has no further pages or the accumulated item
//! count reaches the batch ceiling. The ceiling is checked only after a
//! whole page has been appended, so the last page may overshoot it: provider
//! page boundaries are the only safe resumption points and pages are never
//! split.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::ContinuationToken;

/// One provider page
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Provider cursor for the following page
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_token: Option<String>) -> Self {
        Self { items, next_token }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

/// A list or describe call that returns one page per provider cursor
#[async_trait]
pub trait ListPages: Send + Sync {
    type Item: Send;

    async fn list_page(&self, token: Option<String>) -> Result<Page<Self::Item>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    Pending(Option<String>),
    Exhausted,
}

/// Pull-based sequence of pages starting at an optional continuation token
pub struct PageStream<'a, L: ?Sized> {
    source: &'a L,
    cursor: Cursor,
    pages: usize,
}

impl<'a, L> PageStream<'a, L>
where
    L: ListPages + ?Sized,
{
    pub fn resume(source: &'a L, token: Option<&ContinuationToken>) -> Self {
        Self {
            source,
            cursor: Cursor::Pending(token.map(|t| t.as_str().to_string())),
            pages: 0,
        }
    }

    /// Next page, or `None` once the provider reported the last page.
    ///
    /// A failed fetch leaves the cursor where it was.
    pub async fn next_page(&mut self) -> Result<Option<Page<L::Item>>, ProviderError> {
        let token = match &self.cursor {
            Cursor::Exhausted => return Ok(None),
            Cursor::Pending(token) => token.clone(),
        };

        let page = self.source.list_page(token).await?;
        self.pages += 1;
        self.cursor = match page.next_token.as_deref() {
            Some(next) if !next.is_empty() => Cursor::Pending(Some(next.to_string())),
            _ => Cursor::Exhausted,
        };

        Ok(Some(page))
    }

    /// Token that resumes at the first page not yet returned
    pub fn resume_token(&self) -> Option<ContinuationToken> {
        match &self.cursor {
            Cursor::Pending(Some(token)) => ContinuationToken::new(token.clone()),
            _ => None,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }
}

/// Items gathered for one unit
#[derive(Debug, Clone, PartialEq)]
pub struct Enumeration<T> {
    pub items: Vec<T>,
    /// Present when pages remain beyond the ceiling
    pub next_token: Option<ContinuationToken>,
    pub pages: usize,
}

/// Gather pages until the provider is exhausted or `ceiling` items were seen
pub async fn enumerate<L>(
    source: &L,
    token: Option<&ContinuationToken>,
    ceiling: usize,
) -> Result<Enumeration<L::Item>, ProviderError>
where
    L: ListPages + ?Sized,
{
    let mut stream = PageStream::resume(source, token);
    let mut items = Vec::new();

    while let Some(page) = stream.next_page().await? {
        items.extend(page.items);
        if items.len() >= ceiling {
            break;
        }
    }

    Ok(Enumeration {
        items,
        next_token: stream.resume_token(),
        pages: stream.pages_fetched(),
    })
}
