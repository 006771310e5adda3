/// Router Module Index
///
/// Routes are split by who may call them. Access control is enforced per module: the
/// session layer and the edge guard run for every route, the extractors in the handlers do
/// the per-page checks.

/// Storefront routes: catalog, custom-order form and account sign-up/in/out.
pub mod public;

/// Routes that need a signed-in user (any role).
pub mod authenticated;

/// The back office under `/admin`. Gated by the edge guard and again by the `AdminUser`
/// extractor in every handler except the login page.
pub mod admin;
