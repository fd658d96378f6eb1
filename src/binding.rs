/// Render-side page contract
///
/// Called once per visible page per frame. `touch_page` keeps a page
/// resident (or gets it loading), `bind_page` selects what to draw with.
/// Pages that are not resident yet fall back to their nearest resident
/// ancestor, or to a placeholder when nothing in the chain is loaded.

use crate::page::{FileId, PageAddress, PageIndex};
use crate::registry::CacheRegistry;
use crate::streaming::{BindTarget, RequestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundPage {
    /// The requested page itself
    Exact(BindTarget),

    /// A coarser page covering the requested one
    Ancestor { page: PageIndex, target: BindTarget },

    /// Nothing resident; draw with a placeholder
    Placeholder,
}

impl BoundPage {
    pub fn target(&self) -> Option<BindTarget> {
        match *self {
            BoundPage::Exact(target) | BoundPage::Ancestor { target, .. } => Some(target),
            BoundPage::Placeholder => None,
        }
    }
}

pub trait PageConsumer {
    fn bind_page(&self, file: FileId, page: PageIndex) -> BoundPage;

    fn unbind_page(&self, file: FileId);

    /// Mark a page as visible this frame, requesting it if not resident
    fn touch_page(&self, file: FileId, page: PageIndex, priority: f32) -> RequestStatus;

    fn get_page_bounds(&self, file: FileId, page: PageIndex) -> (f32, f32);

    fn get_page_status(&self, file: FileId, page: PageIndex) -> bool;
}

impl PageConsumer for CacheRegistry {
    fn bind_page(&self, file: FileId, page: PageIndex) -> BoundPage {
        let Some(cache) = self.cache_for(file) else {
            return BoundPage::Placeholder;
        };

        let address = PageAddress::new(file, page);
        let Some((found, _)) = cache.resolve(address) else {
            cache.unbind();
            return BoundPage::Placeholder;
        };
        let Some(target) = cache.bind(found) else {
            return BoundPage::Placeholder;
        };

        if found == address {
            BoundPage::Exact(target)
        } else {
            BoundPage::Ancestor {
                page: found.page,
                target,
            }
        }
    }

    fn unbind_page(&self, file: FileId) {
        if let Some(cache) = self.cache_for(file) {
            cache.unbind();
        }
    }

    fn touch_page(&self, file: FileId, page: PageIndex, priority: f32) -> RequestStatus {
        match self.cache_for(file) {
            Some(cache) => cache.request(PageAddress::new(file, page), priority),
            None => RequestStatus::Miss,
        }
    }

    fn get_page_bounds(&self, file: FileId, page: PageIndex) -> (f32, f32) {
        self.query().page_bounds(file, page)
    }

    fn get_page_status(&self, file: FileId, page: PageIndex) -> bool {
        self.query().page_status(file, page)
    }
}
