//! URL quoting for tokens, values and path fragments.
//!
//! Index files and link paths are shared with tooling that quotes with the
//! conventional "unreserved" set: ASCII alphanumerics plus `_.-~`. Index
//! tokens additionally keep `/` literal.

use std::borrow::Cow;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

const UNRESERVED_PATH: &AsciiSet = &UNRESERVED.remove(b'/');

/// Quotes `value`, leaving `/` untouched.
pub fn quote(value: &str) -> Cow<'_, str> {
    utf8_percent_encode(value, UNRESERVED_PATH).into()
}

/// Quotes `value`, including any `/`.
pub fn quote_all(value: &str) -> Cow<'_, str> {
    utf8_percent_encode(value, UNRESERVED).into()
}

/// Reverses [`quote`] and [`quote_all`]. Invalid UTF-8 is replaced.
pub fn unquote(value: &str) -> Cow<'_, str> {
    percent_decode_str(value).decode_utf8_lossy()
}
