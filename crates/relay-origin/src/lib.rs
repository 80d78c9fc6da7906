//! Library half of `relay-origin`, split out so scenario tests under
//! `tests/` can exercise [`router::OriginRouter`] directly instead of
//! shelling out to the compiled binary.

pub mod router;
