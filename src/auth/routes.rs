//! Route resolution for the screen flow: first run funnels into setup,
//! protected routes require authentication when login is enforced, and the
//! modal routes collapse onto the card screen.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Root,
    Cards,
    Login,
    NewUser,
    NewCard,
    EditCard,
    Recycle,
    Setup,
}

impl Route {
    pub fn is_modal(self) -> bool {
        matches!(self, Route::NewCard | Route::EditCard | Route::Recycle)
    }
}

pub fn normalize_route(requested: Option<&str>) -> Route {
    let Some(raw) = requested else {
        return Route::Root;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "/" => Route::Root,
        "/card" | "/cards" => Route::Cards,
        "/login" => Route::Login,
        "/newuser" => Route::NewUser,
        "/newcard" => Route::NewCard,
        "/editcard" => Route::EditCard,
        "/recycle" => Route::Recycle,
        "/setup" => Route::Setup,
        _ => Route::Root,
    }
}

pub fn resolve_route(
    requested: Route,
    is_authenticated: bool,
    require_login: bool,
    is_first_run: bool,
) -> Route {
    if is_first_run {
        return Route::Setup;
    }
    if !require_login {
        return match requested {
            Route::Root | Route::Login | Route::NewUser => Route::Cards,
            r if r.is_modal() => Route::Cards,
            Route::Setup => Route::Setup,
            other => other,
        };
    }
    match requested {
        Route::NewUser => {
            if is_authenticated {
                Route::Cards
            } else {
                Route::NewUser
            }
        }
        Route::Root | Route::Login => {
            if is_authenticated {
                Route::Cards
            } else {
                Route::Login
            }
        }
        r if r.is_modal() => {
            if is_authenticated {
                Route::Cards
            } else {
                Route::Login
            }
        }
        Route::Setup | Route::Cards => {
            if is_authenticated {
                requested
            } else {
                Route::Login
            }
        }
        _ => {
            if is_authenticated {
                Route::Cards
            } else {
                Route::Login
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_always_resolves_to_setup() {
        for requested in [Route::Root, Route::Cards, Route::Login, Route::Recycle] {
            assert_eq!(resolve_route(requested, false, true, true), Route::Setup);
            assert_eq!(resolve_route(requested, true, false, true), Route::Setup);
        }
    }

    #[test]
    fn unauthenticated_protected_routes_resolve_to_login() {
        for requested in [Route::Root, Route::Cards, Route::NewCard, Route::Recycle] {
            assert_eq!(resolve_route(requested, false, true, false), Route::Login);
        }
        assert_eq!(resolve_route(Route::NewUser, false, true, false), Route::NewUser);
    }

    #[test]
    fn authenticated_login_routes_resolve_to_cards() {
        assert_eq!(resolve_route(Route::Login, true, true, false), Route::Cards);
        assert_eq!(resolve_route(Route::NewUser, true, true, false), Route::Cards);
        assert_eq!(resolve_route(Route::Root, true, true, false), Route::Cards);
    }

    #[test]
    fn modal_routes_collapse_onto_cards() {
        for requested in [Route::NewCard, Route::EditCard, Route::Recycle] {
            assert_eq!(resolve_route(requested, true, true, false), Route::Cards);
            assert_eq!(resolve_route(requested, true, false, false), Route::Cards);
        }
    }

    #[test]
    fn login_optional_mode_skips_the_login_screen() {
        assert_eq!(resolve_route(Route::Root, false, false, false), Route::Cards);
        assert_eq!(resolve_route(Route::Login, false, false, false), Route::Cards);
        assert_eq!(resolve_route(Route::Cards, false, false, false), Route::Cards);
    }

    #[test]
    fn normalize_is_case_insensitive_and_defaults_to_root() {
        assert_eq!(normalize_route(Some("/CARD")), Route::Cards);
        assert_eq!(normalize_route(Some("  /NewUser ")), Route::NewUser);
        assert_eq!(normalize_route(Some("/bogus")), Route::Root);
        assert_eq!(normalize_route(None), Route::Root);
    }
}
