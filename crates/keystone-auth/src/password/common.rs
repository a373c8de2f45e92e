//! Embedded list of passwords rejected outright.

pub(super) const COMMON_PASSWORDS: &[&str] = &[
    "123456",
    "123456789",
    "12345678",
    "1234567890",
    "password",
    "password1",
    "password123",
    "passw0rd",
    "p@ssw0rd",
    "p@ssword1",
    "qwerty",
    "qwerty123",
    "qwertyuiop",
    "abc123",
    "111111",
    "000000",
    "iloveyou",
    "admin",
    "admin123",
    "administrator",
    "welcome",
    "welcome1",
    "welcome123",
    "letmein",
    "monkey",
    "dragon",
    "football",
    "baseball",
    "sunshine",
    "princess",
    "master",
    "shadow",
    "superman",
    "trustno1",
    "changeme",
    "secret",
    "login",
    "starwars",
    "whatever",
    "1q2w3e4r",
    "zaq12wsx",
    "asdfghjkl",
    "michael",
    "charlie",
    "passpass",
    "Password1!",
    "Password123!",
    "Welcome1!",
    "Qwerty123!",
    "Admin@123",
];
