//! Steam profile wishlists, used by the bulk import command.

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::WishlistError;
use crate::types::WishlistItem;
use crate::{STEAM_STORE_BASE, USER_AGENT};

/// Upper bound on pages read from one wishlist.
const MAX_PAGES: u32 = 20;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// External source of `(game_id, title)` pairs for an account.
pub trait WishlistSource {
    fn fetch_wishlist(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<Vec<WishlistItem>, WishlistError>> + Send;
}

/// The two ways a Steam profile can be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupForm {
    /// `/profiles/<steamid64>`
    Profiles,
    /// `/id/<custom url alias>`
    Alias,
}

impl LookupForm {
    fn segment(self) -> &'static str {
        match self {
            LookupForm::Profiles => "profiles",
            LookupForm::Alias => "id",
        }
    }
}

/// Both lookup forms, most likely first: numeric identifiers are tried as
/// SteamID64 before being tried as an alias, anything else the other way round.
pub fn lookup_order(account: &str) -> [LookupForm; 2] {
    if !account.is_empty() && account.bytes().all(|b| b.is_ascii_digit()) {
        [LookupForm::Profiles, LookupForm::Alias]
    } else {
        [LookupForm::Alias, LookupForm::Profiles]
    }
}

/// One decoded `wishlistdata` page.
#[derive(Debug, PartialEq, Eq)]
pub enum WishlistPage {
    Items(Vec<WishlistItem>),
    /// Past the last page.
    End,
    /// Private, unknown or otherwise unreadable profile.
    Unavailable,
}

/// Decode a `wishlistdata` page: an object keyed by app id on success, `[]`
/// past the end, `{"success": 2}` for private or unknown profiles.
pub fn parse_wishlist_page(body: &Value) -> WishlistPage {
    match body {
        Value::Array(items) if items.is_empty() => WishlistPage::End,
        Value::Object(map) if map.contains_key("success") => WishlistPage::Unavailable,
        Value::Object(map) if map.is_empty() => WishlistPage::End,
        Value::Object(map) => {
            let items = map
                .iter()
                .filter(|(app_id, _)| !app_id.is_empty() && app_id.bytes().all(|b| b.is_ascii_digit()))
                .map(|(app_id, data)| WishlistItem {
                    game_id: app_id.clone(),
                    title: data
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect();
            WishlistPage::Items(items)
        }
        _ => WishlistPage::Unavailable,
    }
}

/// Decode a raw page body. Anything that is not JSON (an HTML error or login
/// page) counts as an unreadable profile.
pub fn decode_wishlist_page(body: &[u8]) -> WishlistPage {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => parse_wishlist_page(&value),
        Err(e) => {
            debug!("Wishlist page is not JSON: {e}");
            WishlistPage::Unavailable
        }
    }
}

/// Try each lookup form in order and return the first non-empty wishlist.
///
/// A form that fails outright does not stop the other form from being tried;
/// its error is only returned when no form could be read at all.
async fn first_readable<F, Fut>(account: &str, mut fetch_form: F) -> Result<Vec<WishlistItem>, WishlistError>
where
    F: FnMut(LookupForm) -> Fut,
    Fut: Future<Output = Result<Option<Vec<WishlistItem>>, WishlistError>>,
{
    let mut public_but_empty = false;
    let mut last_error = None;
    for form in lookup_order(account) {
        match fetch_form(form).await {
            Ok(Some(items)) if !items.is_empty() => {
                info!(
                    "Read {} wishlist item(s) for {account} via /{}/",
                    items.len(),
                    form.segment()
                );
                return Ok(items);
            }
            Ok(Some(_)) => public_but_empty = true,
            Ok(None) => debug!("Wishlist {account} not readable via /{}/", form.segment()),
            Err(e) => {
                warn!("Wishlist {account} lookup via /{}/ failed: {e}", form.segment());
                last_error = Some(e);
            }
        }
    }

    if public_but_empty {
        Ok(Vec::new())
    } else {
        Err(last_error.unwrap_or_else(|| WishlistError::NotFound(account.to_string())))
    }
}

/// Reads public wishlists from the Steam store.
pub struct SteamWishlist {
    client: reqwest::Client,
    base_url: Url,
}

impl SteamWishlist {
    pub fn new() -> Result<Self, WishlistError> {
        Self::with_base_url(STEAM_STORE_BASE)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, WishlistError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| WishlistError::Unavailable(format!("bad base URL {base_url}: {e}")))?;
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn page_url(&self, form: LookupForm, account: &str, page: u32) -> Result<Url, WishlistError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| WishlistError::Unavailable("base URL cannot have a path".into()))?
            .pop_if_empty()
            .extend(["wishlist", form.segment(), account, "wishlistdata", ""]);
        url.query_pairs_mut().append_pair("p", &page.to_string());
        Ok(url)
    }

    /// All pages under one lookup form. `None` when the profile is not readable
    /// under this form.
    async fn fetch_form(
        &self,
        form: LookupForm,
        account: &str,
    ) -> Result<Option<Vec<WishlistItem>>, WishlistError> {
        let mut items = Vec::new();
        for page in 0..MAX_PAGES {
            let url = self.page_url(form, account, page)?;
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(WishlistError::Unavailable(format!("Steam answered HTTP {status}")));
            }
            let body = resp.bytes().await?;

            match decode_wishlist_page(&body) {
                WishlistPage::Items(found) => {
                    debug!("Wishlist {account} page {page}: {} item(s)", found.len());
                    items.extend(found);
                }
                WishlistPage::End => break,
                WishlistPage::Unavailable if page == 0 => return Ok(None),
                WishlistPage::Unavailable => break,
            }
        }
        Ok(Some(items))
    }
}

impl WishlistSource for SteamWishlist {
    async fn fetch_wishlist(&self, account: &str) -> Result<Vec<WishlistItem>, WishlistError> {
        let account = account.trim();
        if account.is_empty() {
            return Err(WishlistError::NotFound(String::new()));
        }

        first_readable(account, |form| self.fetch_form(form, account)).await
    }
}
