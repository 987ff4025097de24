/// Signup and authentication against a fresh in-memory store.
use warbler_auth::{AuthError, AuthResult, authenticate, signup};
use warbler_db::{Database, DbError, User};

const HERO: &str = "/static/images/warbler-hero.jpg";

fn db_with_testuser() -> (Database, User) {
    let db = Database::open_in_memory().unwrap();
    let new = signup("test@test.com", "testuser", "password123", Some(HERO)).unwrap();
    let user = db.insert_user(&new).unwrap();
    (db, user)
}

#[test]
fn signup_with_valid_credentials_persists_hashed_user() {
    let (db, user) = db_with_testuser();

    assert!(user.id > 0);
    assert_eq!(user.username, "testuser");
    assert_eq!(user.email, "test@test.com");
    assert_eq!(user.image_url, HERO);
    assert_ne!(user.password, "password123");
    assert!(user.password.starts_with("$argon2"));

    let stored = db.get_user_by_username("testuser").unwrap().unwrap();
    assert_eq!(stored, user);
}

#[test]
fn signup_does_not_touch_the_store() {
    let db = Database::open_in_memory().unwrap();
    let new = signup("test@test.com", "testuser", "password123", None).unwrap();

    assert_eq!(new.image_url, "/static/images/default-pic.png");
    assert_eq!(db.table_counts().unwrap().users, 0);
}

#[test]
fn signing_up_twice_with_same_credentials_fails_on_second_insert() {
    let (db, _) = db_with_testuser();

    let again = signup("test@test.com", "testuser", "password456", Some(HERO)).unwrap();
    let err = db.insert_user(&again).unwrap_err();

    assert!(matches!(err, DbError::DuplicateCredential { .. }));
    assert_eq!(db.table_counts().unwrap().users, 1);
}

#[test]
fn authenticate_with_valid_credentials_returns_user() {
    let (db, user) = db_with_testuser();

    let result = authenticate(&db, "testuser", "password123").unwrap();
    assert!(result.is_found());
    assert_eq!(result.user(), Some(user));
}

#[test]
fn authenticate_with_unknown_username_is_not_found() {
    let (db, _) = db_with_testuser();

    let result = authenticate(&db, "invalidusername", "password123").unwrap();
    assert_eq!(result, AuthResult::NotFound);
}

#[test]
fn authenticate_with_wrong_password_is_not_found() {
    let (db, _) = db_with_testuser();

    let result = authenticate(&db, "testuser", "wrongpassword").unwrap();
    assert_eq!(result, AuthResult::NotFound);
}

#[test]
fn authenticate_is_case_sensitive_on_username() {
    let (db, _) = db_with_testuser();

    let result = authenticate(&db, "TestUser", "password123").unwrap();
    assert_eq!(result.user(), None);
}

#[test]
fn authenticate_against_unhashed_password_is_an_error() {
    let db = Database::open_in_memory().unwrap();
    db.insert_user(&warbler_db::NewUser::new("raw@test.com", "raw", "HASHED_PASSWORD"))
        .unwrap();

    let err = authenticate(&db, "raw", "HASHED_PASSWORD").unwrap_err();
    assert!(matches!(err, AuthError::Password(_)));
}
